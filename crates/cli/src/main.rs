mod config;

use std::fmt::{Display, Formatter};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clip_engine::memory::InMemoryTimeline;
use clip_engine::{
    Command, Engine, EngineError, EngineErrorEvent, EngineErrorKind, OperationReport,
    TimelineService,
};
use config::{BackendConfig, ConfigError, load_config, load_fixture};
use serde::Serialize;
use timeline_service::{ServiceClient, ServiceError, TcpTransport};
use tracing::{info, warn};

/// One output line per input command.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum Response {
    Report(OperationReport),
    Error(EngineErrorEvent),
}

#[derive(Debug)]
enum CliError {
    Usage,
    Config(ConfigError),
    Connect(ServiceError),
    Engine(EngineError),
    Io(io::Error),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usage => write!(f, "usage: clip-cli <config.json>"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Connect(err) => write!(f, "cannot reach timeline service: {err}"),
            Self::Engine(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Usage => None,
            Self::Config(err) => Some(err),
            Self::Connect(err) => Some(err),
            Self::Engine(err) => Some(err),
            Self::Io(err) => Some(err),
        }
    }
}

impl From<io::Error> for CliError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

fn main() -> ExitCode {
    init_tracing();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("clip-cli: {error}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<(), CliError> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .ok_or(CliError::Usage)?;
    let config = load_config(&path).map_err(CliError::Config)?;

    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    match config.backend {
        BackendConfig::Tcp {
            address,
            timeout_ms,
        } => {
            let timeout = timeout_ms.map(Duration::from_millis);
            let transport =
                TcpTransport::connect(address.as_str(), timeout).map_err(CliError::Connect)?;
            info!(%address, "connected to timeline service");
            let engine = Engine::with_config(ServiceClient::new(transport), config.engine)
                .map_err(CliError::Engine)?;
            serve(&engine, stdin, stdout)?;
        }
        BackendConfig::Memory { fixture } => {
            let fixture = load_fixture(&fixture).map_err(CliError::Config)?;
            info!(tracks = fixture.tracks.len(), "running against simulated timeline");
            let engine = Engine::with_config(InMemoryTimeline::new(fixture), config.engine)
                .map_err(CliError::Engine)?;
            serve(&engine, stdin, stdout)?;
        }
    }
    Ok(())
}

/// Reads one JSON command per line and writes one JSON response per line.
fn serve<S, R, W>(engine: &Engine<S>, input: R, mut output: W) -> io::Result<()>
where
    S: TimelineService,
    R: BufRead,
    W: Write,
{
    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Command>(line) {
            Ok(command) => match engine.handle_command(command) {
                Ok(report) => Response::Report(report),
                Err(error) => {
                    warn!(%error, "command failed");
                    Response::Error(EngineErrorEvent::from_error(&error))
                }
            },
            Err(error) => Response::Error(EngineErrorEvent {
                kind: EngineErrorKind::InvalidRequest,
                message: format!("malformed command: {error}"),
            }),
        };
        serde_json::to_writer(&mut output, &response)?;
        writeln!(output)?;
        output.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use clip_engine::Engine;
    use clip_engine::memory::{InMemoryTimeline, SimClip, TimelineFixture, TrackFixture};
    use serde_json::Value;

    use super::serve;

    fn engine() -> Engine<InMemoryTimeline> {
        Engine::new(InMemoryTimeline::new(TimelineFixture {
            tempo: 120.0,
            samples: Default::default(),
            tracks: vec![TrackFixture {
                clips: vec![SimClip::midi(0.0, 32.0)],
            }],
        }))
    }

    fn responses(input: &str) -> Vec<Value> {
        let engine = engine();
        let mut output = Vec::new();
        serve(&engine, Cursor::new(input), &mut output).expect("serve should succeed");
        String::from_utf8(output)
            .expect("output is utf-8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("each line is json"))
            .collect()
    }

    #[test]
    fn each_command_line_yields_one_report_line() {
        let lines = responses(concat!(
            r#"{"op":"shorten","clip":{"arrangement":{"track":0,"id":"0:0:0","start":0.0}},"target_duration":16.0}"#,
            "\n\n",
            r#"{"op":"move","clip":{"arrangement":{"track":0,"id":"stale","start":0.0}},"new_start":64.0}"#,
            "\n",
        ));

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["report"]["status"], "full");
        assert_eq!(lines[1]["report"]["result_clips"][0]["arrangement"]["start"], 64.0);
    }

    #[test]
    fn malformed_line_reports_invalid_request_and_continues() {
        let lines = responses(concat!(
            "{not json}\n",
            r#"{"op":"lengthen","clip":{"arrangement":{"track":0,"id":"x","start":3.0}},"target_duration":40.0}"#,
            "\n",
        ));

        assert_eq!(lines[0]["error"]["kind"], "invalid_request");
        assert_eq!(lines[1]["error"]["kind"], "invalid_reference");
    }
}
