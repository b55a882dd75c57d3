//! `espeak` / `espeak-ng` command-line backend

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::backend::{
    BackendKind, FILE_SYNTHESIS_TIMEOUT, ProcessJob, SpeechBackend, SpeechJob, VoiceInfo,
    check_program, run_to_completion,
};
use crate::persona::VoiceParams;
use crate::{Error, Result};

/// Executable names tried in order
const CANDIDATES: &[&str] = &["espeak", "espeak-ng", "espeak-ng.exe", "espeak.exe"];

/// Speaks by running an espeak executable, text on stdin
pub struct EspeakBackend {
    program: PathBuf,
}

impl EspeakBackend {
    /// Use `program` without probing it
    #[must_use]
    pub const fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// Find a working espeak executable
    pub async fn probe(explicit: Option<&Path>) -> Option<Self> {
        let discovered = CANDIDATES.iter().filter_map(|name| which::which(name).ok());
        let candidates: Vec<PathBuf> = explicit
            .map(Path::to_path_buf)
            .into_iter()
            .chain(discovered)
            .collect();

        for program in candidates {
            if let Some(version) = check_program(&program, &["--version"]).await {
                tracing::info!(program = %program.display(), version = %version, "found espeak");
                return Some(Self::new(program));
            }
            tracing::debug!(program = %program.display(), "espeak candidate not usable");
        }
        None
    }

    /// Path of the executable in use
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, params: &VoiceParams) -> Command {
        let mut command = Command::new(&self.program);
        command.args(voice_args(params)).arg("--stdin");
        command
    }
}

/// Command-line flags for `params`
fn voice_args(params: &VoiceParams) -> Vec<String> {
    vec![
        "-v".to_string(),
        params.voice_id.clone(),
        "-s".to_string(),
        params.rate_wpm.to_string(),
        "-p".to_string(),
        params.pitch.to_string(),
        "-a".to_string(),
        params.gain.to_string(),
    ]
}

/// Parse `espeak --voices` output, skipping the header row
fn parse_voices(listing: &str) -> Vec<VoiceInfo> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            (parts.len() >= 4).then(|| VoiceInfo {
                code: parts[1].to_string(),
                name: parts[3..].join(" "),
            })
        })
        .collect()
}

#[async_trait]
impl SpeechBackend for EspeakBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Espeak
    }

    async fn start(&self, text: &str, params: &VoiceParams) -> Result<Box<dyn SpeechJob>> {
        tracing::debug!(
            voice = %params.voice_id,
            rate = params.rate_wpm,
            chars = text.len(),
            "starting espeak"
        );
        let job = ProcessJob::spawn(self.command(params), self.program.clone(), Some(text)).await?;
        Ok(Box::new(job))
    }

    async fn synthesize_to_file(
        &self,
        text: &str,
        params: &VoiceParams,
        path: &Path,
    ) -> Result<()> {
        let mut command = self.command(params);
        command.arg("-w").arg(path);
        run_to_completion(command, &self.program, Some(text), FILE_SYNTHESIS_TIMEOUT).await?;
        tracing::info!(path = %path.display(), "saved speech to file");
        Ok(())
    }

    async fn voices(&self) -> Result<Vec<VoiceInfo>> {
        let output = tokio::time::timeout(
            FILE_SYNTHESIS_TIMEOUT,
            Command::new(&self.program)
                .arg("--voices")
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| Error::SynthesisFailed("voice listing timed out".to_string()))??;

        if !output.status.success() {
            return Err(Error::SynthesisFailed(format!(
                "voice listing exited with {}",
                output.status
            )));
        }

        Ok(parse_voices(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_voice_flags() {
        let params = VoiceParams {
            voice_id: "en-us".into(),
            rate_wpm: 160,
            pitch: 45,
            gain: 95,
        };
        assert_eq!(
            voice_args(&params),
            vec!["-v", "en-us", "-s", "160", "-p", "45", "-a", "95"]
        );
    }

    #[test]
    fn parses_voice_listing() {
        let listing = "\
Pty Language       Age/Gender VoiceName          File                 Other Languages
 5  af              --/M      Afrikaans          gmw/af
 5  en-gb           --/M      English (Great Britain) gmw/en
 bad line
";
        let voices = parse_voices(listing);
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[0].code, "af");
        assert_eq!(voices[0].name, "Afrikaans gmw/af");
        assert_eq!(voices[1].code, "en-gb");
    }

    #[tokio::test]
    async fn missing_explicit_program_is_skipped() {
        let missing = Path::new("/nonexistent/espeak-for-tests");
        assert!(check_program(missing, &["--version"]).await.is_none());
    }
}
