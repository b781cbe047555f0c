use super::{SpeechEngine, SpeechEvent, SpeechFailure, SpeechOutcome, Utterance, UtteranceTag, Voice};
use crate::error::SpeechError;
use std::process::{Child, Command, Stdio};

const BASE_WORDS_PER_MINUTE: f32 = 175.0;
const MIN_WORDS_PER_MINUTE: u32 = 80;
const MAX_WORDS_PER_MINUTE: u32 = 450;

/// Speech through an `espeak-ng` compatible program, one child process per
/// utterance. Pausing stops the child with SIGSTOP on Unix.
pub struct CommandSpeech {
    program: String,
    current: Option<RunningUtterance>,
    paused: bool,
    pending_events: Vec<SpeechEvent>,
    voices_cache: Option<Vec<Voice>>,
}

struct RunningUtterance {
    tag: UtteranceTag,
    child: Child,
}

pub fn words_per_minute(rate: f32) -> u32 {
    ((BASE_WORDS_PER_MINUTE * rate).round() as u32).clamp(MIN_WORDS_PER_MINUTE, MAX_WORDS_PER_MINUTE)
}

/// Parses `espeak-ng --voices` output:
/// `Pty Language Age/Gender VoiceName File Other Languages`.
pub fn parse_voice_list(output: &str) -> Vec<Voice> {
    output
        .lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 5 || columns[0] == "Pty" {
                return None;
            }
            Some(Voice {
                id: columns[1].to_string(),
                name: columns[3].replace('_', " "),
                language: columns[1].to_string(),
            })
        })
        .collect()
}

impl CommandSpeech {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            current: None,
            paused: false,
            pending_events: Vec::new(),
            voices_cache: None,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.current.is_some()
    }

    #[cfg(unix)]
    fn signal_current(&self, signal: libc::c_int) {
        if let Some(running) = &self.current {
            let pid = running.child.id() as libc::pid_t;
            // SAFETY: the pid belongs to a child that has not been reaped yet.
            let result = unsafe { libc::kill(pid, signal) };
            if result != 0 {
                tracing::warn!(pid, signal, "failed to signal speech process");
            }
        }
    }
}

impl SpeechEngine for CommandSpeech {
    fn voices(&mut self) -> Vec<Voice> {
        if let Some(voices) = &self.voices_cache {
            return voices.clone();
        }
        let voices = match Command::new(&self.program).arg("--voices").output() {
            Ok(output) if output.status.success() => {
                parse_voice_list(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                tracing::warn!(program = %self.program, status = %output.status, "voice listing failed");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(program = %self.program, error = %e, "speech program unavailable");
                Vec::new()
            }
        };
        self.voices_cache = Some(voices.clone());
        voices
    }

    fn speak(&mut self, utterance: Utterance) -> Result<(), SpeechError> {
        self.cancel();
        let voice = utterance
            .voice_id
            .clone()
            .unwrap_or_else(|| utterance.language.clone());
        let child = Command::new(&self.program)
            .arg("-v")
            .arg(&voice)
            .arg("-s")
            .arg(words_per_minute(utterance.rate).to_string())
            .arg("--")
            .arg(&utterance.text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SpeechError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        tracing::trace!(generation = utterance.tag.generation, sentence = utterance.tag.sentence, "speaking");
        self.current = Some(RunningUtterance {
            tag: utterance.tag,
            child,
        });
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        if self.current.is_none() || self.paused {
            return;
        }
        #[cfg(unix)]
        self.signal_current(libc::SIGSTOP);
        #[cfg(not(unix))]
        tracing::warn!("pausing speech is not supported on this platform");
        self.paused = true;
    }

    fn resume(&mut self) {
        if !self.paused {
            return;
        }
        #[cfg(unix)]
        self.signal_current(libc::SIGCONT);
        self.paused = false;
    }

    fn cancel(&mut self) {
        let Some(mut running) = self.current.take() else {
            return;
        };
        if self.paused {
            #[cfg(unix)]
            {
                let pid = running.child.id() as libc::pid_t;
                // SAFETY: see signal_current; the child is still unreaped.
                unsafe {
                    libc::kill(pid, libc::SIGCONT);
                }
            }
            self.paused = false;
        }
        let _ = running.child.kill();
        let _ = running.child.wait();
        self.pending_events.push(SpeechEvent {
            tag: running.tag,
            outcome: SpeechOutcome::Failed(SpeechFailure::Interrupted),
        });
    }

    fn poll_events(&mut self) -> Vec<SpeechEvent> {
        let finished = match self.current.as_mut() {
            Some(running) => match running.child.try_wait() {
                Ok(Some(status)) if status.success() => Some(SpeechOutcome::Finished),
                Ok(Some(status)) => Some(SpeechOutcome::Failed(SpeechFailure::Other(format!(
                    "speech program exited with {}",
                    status
                )))),
                Ok(None) => None,
                Err(e) => Some(SpeechOutcome::Failed(SpeechFailure::Other(e.to_string()))),
            },
            None => None,
        };
        if let Some(outcome) = finished {
            if let Some(running) = self.current.take() {
                self.pending_events.push(SpeechEvent {
                    tag: running.tag,
                    outcome,
                });
            }
            self.paused = false;
        }
        std::mem::take(&mut self.pending_events)
    }
}

impl Drop for CommandSpeech {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_espeak_voice_listing() {
        let output = "Pty Language       Age/Gender VoiceName          File                 Other Languages\n \
                      5  af              --/M      Afrikaans          gmw/af\n \
                      2  en-us           --/M      English_(America)  gmw/en-US            (en 10)\n";
        let voices = parse_voice_list(output);
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[1].id, "en-us");
        assert_eq!(voices[1].name, "English (America)");
        assert!(voices[1].matches_language("en"));
        assert!(!voices[0].matches_language("en"));
    }

    #[test]
    fn rate_maps_to_bounded_words_per_minute() {
        assert_eq!(words_per_minute(1.0), 175);
        assert_eq!(words_per_minute(0.8), 140);
        assert_eq!(words_per_minute(0.1), MIN_WORDS_PER_MINUTE);
        assert_eq!(words_per_minute(10.0), MAX_WORDS_PER_MINUTE);
    }

    #[test]
    fn missing_program_fails_to_speak_and_lists_no_voices() {
        let mut engine = CommandSpeech::new("definitely-not-a-speech-program-xyz");
        assert!(engine.voices().is_empty());
        let result = engine.speak(Utterance {
            tag: UtteranceTag { generation: 1, sentence: 0 },
            text: "Hello.".to_string(),
            voice_id: None,
            language: "en".to_string(),
            rate: 1.0,
        });
        assert!(matches!(result, Err(SpeechError::Spawn { .. })));
        assert!(!engine.is_speaking());
        assert!(engine.poll_events().is_empty());
    }
}
