use std::time::Duration;

use clap::Parser;
use gpsd_stream::{config::ClientConfig, protocol::v3::ResponseMessage};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Print the GPSD report stream", long_about = None)]
struct Args {
    #[arg(short = 'H', long, default_value = gpsd_stream::client::DEFAULT_HOST)]
    host: String,
    #[arg(short, long, default_value_t = gpsd_stream::client::DEFAULT_PORT)]
    port: u16,
    /// Only watch this device
    #[arg(short, long)]
    device: Option<String>,
    /// Report classes to print, e.g. `-f TPV -f SKY`
    #[arg(short, long)]
    filter: Vec<String>,
    /// Print lines exactly as GPSD sent them
    #[arg(long)]
    raw: bool,
    #[arg(long)]
    convert_timestamps: bool,
    #[arg(long)]
    strict_timestamps: bool,
    #[arg(long)]
    skip_malformed: bool,
    /// Seconds, fractional allowed
    #[arg(long, value_parser = parse_seconds)]
    connect_timeout: Option<Duration>,
    /// Seconds, fractional allowed
    #[arg(long, value_parser = parse_seconds)]
    read_timeout: Option<Duration>,
}

/// Parses a non-negative, finite number of seconds
fn parse_seconds(arg: &str) -> Result<Duration, String> {
    let secs: f64 = arg.parse().map_err(|e| format!("`{arg}` is not a number: {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("`{arg}` is not a valid timeout: {e}"))
}

impl Args {
    fn config(&self) -> ClientConfig {
        ClientConfig {
            host: self.host.clone(),
            port: self.port,
            device: self.device.clone(),
            filter: self.filter.clone(),
            convert_timestamps: self.convert_timestamps,
            strict_timestamps: self.strict_timestamps,
            skip_malformed: self.skip_malformed,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = args.config();
    let mut session = config.session();

    if args.raw {
        let filter = config.report_options().filter_classes().clone();
        for line in session.text_stream_filtered(filter) {
            match line {
                Ok(line) => println!("{line}"),
                Err(e) if e.is_terminal() => {
                    eprintln!("Stream ended: {e}");
                    return;
                }
                Err(e) => eprintln!("Skipping record: {e}"),
            }
        }
        return;
    }

    for report in session.report_stream(config.report_options()) {
        let report = match report {
            Ok(report) => report,
            Err(e) if e.is_terminal() => {
                eprintln!("Stream ended: {e}");
                return;
            }
            Err(e) => {
                eprintln!("Skipping record: {e}");
                continue;
            }
        };

        match report.clone().into_message() {
            Ok(ResponseMessage::Tpv(tpv)) => {
                if let (Some(lat), Some(lon)) = (tpv.lat, tpv.lon) {
                    println!("[{:?}] lat {lat:9.5}, lon {lon:10.5} ({:?})", tpv.time, tpv.mode);
                }
            }
            Ok(ResponseMessage::Sky(sky)) => {
                println!(
                    "Satellites in view: {}, used: {}",
                    sky.satellites.len(),
                    sky.used().count()
                );
            }
            _ => println!("{}", report.to_value()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_parse_as_seconds() {
        assert_eq!(parse_seconds("1.5"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_seconds("0"), Ok(Duration::ZERO));
    }

    #[test]
    fn test_bad_timeouts_are_rejected() {
        for arg in ["-1", "NaN", "inf", "soon"] {
            assert!(parse_seconds(arg).is_err(), "{arg} should be rejected");
        }

        let err = Args::try_parse_from(["stream", "--read-timeout=-0.5"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
