//! Windows System.Speech backend, driven through PowerShell

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

const LOAD_SYNTHESIZER: &str = "Add-Type -AssemblyName System.Speech; \
     $s = New-Object System.Speech.Synthesis.SpeechSynthesizer;";

/// Speaks through the OS speech API
///
/// Pitch has no System.Speech equivalent and is ignored.
pub struct SapiBackend {
    powershell: PathBuf,
}

impl SapiBackend {
    /// Find PowerShell with System.Speech loadable (Windows only)
    pub async fn probe() -> Option<Self> {
        if !cfg!(windows) {
            return None;
        }

        let powershell = ["powershell.exe", "powershell", "pwsh.exe"]
            .iter()
            .find_map(|name| which::which(name).ok())?;

        let script = format!("{LOAD_SYNTHESIZER} 'ok'");
        check_program(&powershell, &["-NoProfile", "-Command", &script])
            .await
            .map(|_| Self { powershell })
    }

    fn command(&self, script: &str) -> Command {
        let mut command = Command::new(&self.powershell);
        command.args(["-NoProfile", "-NonInteractive", "-Command", script]);
        command
    }
}

/// Map words per minute onto the SAPI -10..=10 rate scale (180 wpm is 0)
fn sapi_rate(rate_wpm: u32) -> i32 {
    let wpm = i32::try_from(rate_wpm).unwrap_or(i32::MAX);
    ((wpm - 180) / 20).clamp(-10, 10)
}

/// Map 0-200 gain onto the SAPI 0-100 volume scale
fn sapi_volume(gain: u32) -> u32 {
    (gain / 2).min(100)
}

fn speak_script(params: &VoiceParams, output: Option<&Path>) -> String {
    let target = output.map_or_else(String::new, |path| {
        let quoted = path.display().to_string().replace('\'', "''");
        format!(" $s.SetOutputToWaveFile('{quoted}');")
    });
    format!(
        "{LOAD_SYNTHESIZER} $s.Rate = {}; $s.Volume = {};{target} \
         $t = [Console]::In.ReadToEnd(); $s.Speak($t); $s.Dispose()",
        sapi_rate(params.rate_wpm),
        sapi_volume(params.gain),
    )
}

#[async_trait]
impl SpeechBackend for SapiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sapi
    }

    async fn start(&self, text: &str, params: &VoiceParams) -> Result<Box<dyn SpeechJob>> {
        let command = self.command(&speak_script(params, None));
        let job = ProcessJob::spawn(command, self.powershell.clone(), Some(text)).await?;
        Ok(Box::new(job))
    }

    async fn synthesize_to_file(
        &self,
        text: &str,
        params: &VoiceParams,
        path: &Path,
    ) -> Result<()> {
        let command = self.command(&speak_script(params, Some(path)));
        run_to_completion(command, &self.powershell, Some(text), FILE_SYNTHESIS_TIMEOUT).await
    }

    async fn voices(&self) -> Result<Vec<VoiceInfo>> {
        let script = format!(
            "{LOAD_SYNTHESIZER} $s.GetInstalledVoices() | \
             ForEach-Object {{ $_.VoiceInfo.Culture.Name + '|' + $_.VoiceInfo.Name }}"
        );
        let output = self
            .command(&script)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::SynthesisFailed("voice listing failed".to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().split_once('|'))
            .map(|(code, name)| VoiceInfo {
                code: code.to_string(),
                name: name.to_string(),
            })
            .collect())
    }
}
