//! Console control surface
//!
//! One command per line: parameter changes, snapshot exports, manual
//! reloads and status. Everything here runs off the audio thread.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::export::SnapshotEncoder;
use super::reload::ReloadCoordinator;
use crate::audio::engine::AudioCallbackEngine;
use crate::audio::params::ParameterChannel;
use crate::audio::plugin::ModuleHost;

const HELP: &str = "\
commands:
  freq <hz>          set frequency (20 - 20000)
  gain <0..1>        set output gain
  bypass [on|off]    set or toggle bypass
  record [path]      export the recent history to a WAV file
  reload             rebuild and reload the module
  status             show parameters and module state
  help               show this list
  quit | exit        stop the host";

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("unknown command `{0}` (try `help`)")]
    Unknown(String),

    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),

    #[error("`{value}` is not a number")]
    InvalidNumber { value: String },

    #[error("expected `on` or `off`, got `{0}`")]
    InvalidSwitch(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    SetFrequency(f32),
    SetGain(f32),
    /// `None` toggles
    Bypass(Option<bool>),
    /// `None` uses the configured path
    Record(Option<PathBuf>),
    Reload,
    Status,
    Help,
    Quit,
}

impl ControlCommand {
    /// Parse one console line. Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, ControlError> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let arg = words.next();

        let command = match head.to_ascii_lowercase().as_str() {
            "freq" | "frequency" => ControlCommand::SetFrequency(number(arg, "freq")?),
            "gain" => ControlCommand::SetGain(number(arg, "gain")?),
            "bypass" => ControlCommand::Bypass(match arg.map(str::to_ascii_lowercase).as_deref() {
                None => None,
                Some("on") | Some("1") | Some("true") => Some(true),
                Some("off") | Some("0") | Some("false") => Some(false),
                Some(_) => return Err(ControlError::InvalidSwitch(arg.unwrap_or_default().into())),
            }),
            "record" | "rec" => ControlCommand::Record(arg.map(PathBuf::from)),
            "reload" => ControlCommand::Reload,
            "status" => ControlCommand::Status,
            "help" | "?" => ControlCommand::Help,
            "quit" | "exit" => ControlCommand::Quit,
            other => return Err(ControlError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn number(arg: Option<&str>, command: &'static str) -> Result<f32, ControlError> {
    let value = arg.ok_or(ControlError::MissingArgument(command))?;
    value.parse::<f32>().map_err(|_| ControlError::InvalidNumber {
        value: value.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlReply {
    Text(String),
    Quit,
}

pub struct ControlSurface {
    params: Arc<ParameterChannel>,
    host: Arc<ModuleHost>,
    engine: Arc<AudioCallbackEngine>,
    coordinator: Arc<ReloadCoordinator>,
    encoder: Arc<SnapshotEncoder>,
    record_path: PathBuf,
}

impl ControlSurface {
    pub fn new(
        host: Arc<ModuleHost>,
        engine: Arc<AudioCallbackEngine>,
        coordinator: Arc<ReloadCoordinator>,
        encoder: Arc<SnapshotEncoder>,
        record_path: PathBuf,
    ) -> Self {
        Self {
            params: Arc::clone(host.params()),
            host,
            engine,
            coordinator,
            encoder,
            record_path,
        }
    }

    pub async fn execute(&self, command: ControlCommand) -> ControlReply {
        let text = match command {
            ControlCommand::SetFrequency(hz) => {
                self.params.set_frequency(hz);
                format!("frequency {:.1} Hz", self.params.frequency())
            }
            ControlCommand::SetGain(gain) => {
                self.params.set_gain(gain);
                format!("gain {:.3}", self.params.gain())
            }
            ControlCommand::Bypass(Some(on)) => {
                self.params.set_bypass(on);
                format!("bypass {}", on_off(on))
            }
            ControlCommand::Bypass(None) => {
                let on = self.params.toggle_bypass();
                format!("bypass {}", on_off(on))
            }
            ControlCommand::Record(path) => {
                let path = path.unwrap_or_else(|| self.record_path.clone());
                let encoder = Arc::clone(&self.encoder);
                match tokio::task::spawn_blocking(move || encoder.export(&path)).await {
                    Ok(Ok(summary)) => format!(
                        "wrote {} frames to {} (peak {:.3})",
                        summary.frames,
                        summary.path.display(),
                        summary.peak
                    ),
                    Ok(Err(e)) => format!("export failed: {}", e),
                    Err(e) => format!("export failed: {}", e),
                }
            }
            ControlCommand::Reload => match self.coordinator.trigger() {
                Some(_) => "reload started".to_string(),
                None => "reload already in progress".to_string(),
            },
            ControlCommand::Status => self.status_text(),
            ControlCommand::Help => HELP.to_string(),
            ControlCommand::Quit => return ControlReply::Quit,
        };
        ControlReply::Text(text)
    }

    pub fn status_text(&self) -> String {
        let params = self.params.snapshot();
        let module = self.host.status();
        let history = self.engine.history();

        let mut text = String::new();
        let _ = writeln!(
            text,
            "params:  freq {:.1} Hz, gain {:.3}, bypass {}, {} Hz",
            params.frequency,
            params.gain,
            on_off(params.bypass),
            params.sample_rate
        );
        let _ = writeln!(
            text,
            "module:  {} (generation {})",
            module.live.as_deref().unwrap_or("none"),
            module
                .generation
                .map(|g| g.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        let _ = writeln!(
            text,
            "reloads: {} ok, {} failed, {} loads, {} load failures, {:?}",
            self.coordinator.completed(),
            self.coordinator.failed(),
            module.loads,
            module.failures,
            self.coordinator.state()
        );
        if let Some(err) = &module.last_error {
            let _ = writeln!(text, "last error: {}", err);
        }
        let _ = write!(
            text,
            "output:  peak {:.3}{}, history {:.0}% of {} frames",
            self.engine.output_level(),
            if self.engine.take_clipping() { " CLIPPED" } else { "" },
            history.fill_ratio() * 100.0,
            history.recorded_frames()
        );
        text
    }

    /// Read commands from `input` until it closes or `quit` is entered,
    /// writing replies to `output`.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: std::io::Write,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let command = match ControlCommand::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    writeln!(output, "{}", e)?;
                    continue;
                }
            };

            log::debug!("Control command: {:?}", command);
            match self.execute(command).await {
                ControlReply::Text(text) => writeln!(output, "{}", text)?,
                ControlReply::Quit => break,
            }
            output.flush()?;
        }
        Ok(())
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::history::HistoryRing;
    use crate::audio::plugin::{sine, LiveModule, ShadowCopy};
    use crate::commands::reload::ReloadSettings;
    use std::time::Duration;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            ControlCommand::parse("freq 440"),
            Ok(Some(ControlCommand::SetFrequency(440.0)))
        );
        assert_eq!(
            ControlCommand::parse("  GAIN 0.5 "),
            Ok(Some(ControlCommand::SetGain(0.5)))
        );
        assert_eq!(
            ControlCommand::parse("bypass"),
            Ok(Some(ControlCommand::Bypass(None)))
        );
        assert_eq!(
            ControlCommand::parse("bypass off"),
            Ok(Some(ControlCommand::Bypass(Some(false))))
        );
        assert_eq!(
            ControlCommand::parse("record /tmp/x.wav"),
            Ok(Some(ControlCommand::Record(Some(PathBuf::from("/tmp/x.wav")))))
        );
        assert_eq!(ControlCommand::parse("exit"), Ok(Some(ControlCommand::Quit)));
        assert_eq!(ControlCommand::parse("   "), Ok(None));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            ControlCommand::parse("freq"),
            Err(ControlError::MissingArgument("freq"))
        );
        assert_eq!(
            ControlCommand::parse("gain loud"),
            Err(ControlError::InvalidNumber {
                value: "loud".to_string()
            })
        );
        assert_eq!(
            ControlCommand::parse("bypass maybe"),
            Err(ControlError::InvalidSwitch("maybe".to_string()))
        );
        assert_eq!(
            ControlCommand::parse("dance"),
            Err(ControlError::Unknown("dance".to_string()))
        );
    }

    fn surface(dir: &std::path::Path) -> ControlSurface {
        let live = Arc::new(LiveModule::new());
        let params = Arc::new(ParameterChannel::default());
        let host = Arc::new(ModuleHost::new(
            Arc::clone(&live),
            params,
            ShadowCopy::Disabled,
        ));
        host.load_builtin("sine", sine::entry_points()).unwrap();

        let history = Arc::new(HistoryRing::new(480, 64));
        let engine = Arc::new(AudioCallbackEngine::new(live, Arc::clone(&history)));
        let coordinator = Arc::new(ReloadCoordinator::new(
            Arc::clone(&host),
            ReloadSettings {
                watch_path: dir.join("lib.rs"),
                binary_path: dir.join("libmissing.so"),
                build: None,
                poll_interval: Duration::from_millis(10),
            },
        ));
        let encoder = Arc::new(SnapshotEncoder::new(history, 48_000, 16));
        ControlSurface::new(host, engine, coordinator, encoder, dir.join("take.wav"))
    }

    #[tokio::test]
    async fn test_parameter_commands() {
        let dir = tempfile::tempdir().unwrap();
        let surface = surface(dir.path());

        surface.execute(ControlCommand::SetFrequency(50_000.0)).await;
        assert_eq!(surface.params.frequency(), 20_000.0);

        surface.execute(ControlCommand::SetGain(0.25)).await;
        assert_eq!(surface.params.gain(), 0.25);

        let reply = surface.execute(ControlCommand::Bypass(None)).await;
        assert_eq!(reply, ControlReply::Text("bypass on".to_string()));
        assert!(surface.params.bypass());

        assert_eq!(surface.execute(ControlCommand::Quit).await, ControlReply::Quit);
    }

    #[tokio::test]
    async fn test_record_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let surface = surface(dir.path());

        let mut block = vec![0.0f32; 128];
        for _ in 0..4 {
            surface.engine.render(&mut block);
        }

        let reply = surface.execute(ControlCommand::Record(None)).await;
        assert!(matches!(reply, ControlReply::Text(ref t) if t.starts_with("wrote 480 frames")));
        assert!(dir.path().join("take.wav").exists());
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_quit() {
        let dir = tempfile::tempdir().unwrap();
        let surface = surface(dir.path());

        let input: &[u8] = b"gain 0.5\nnonsense\n\nstatus\nquit\ngain 0.9\n";
        let mut output = Vec::new();
        surface.run(input, &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("gain 0.500"));
        assert!(text.contains("unknown command `nonsense`"));
        assert!(text.contains("module:  sine (generation 1)"));
        assert_eq!(surface.params.gain(), 0.5);
    }
}
