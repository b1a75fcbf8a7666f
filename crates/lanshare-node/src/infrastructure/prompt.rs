//! Terminal implementation of [`PeerVerifier`].
//!
//! Prints the peer's label, grouped fingerprint, and SAS words, then reads a
//! `y/N` answer from stdin.  Stdin is blocking, so the read runs on a
//! detached thread that runtime shutdown never waits for.  An answer that
//! arrives after the pairing deadline is discarded.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use crate::application::verify::{PeerVerifier, Verdict, VerificationRequest, VerifyError};

#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalVerifier;

#[async_trait]
impl PeerVerifier for TerminalVerifier {
    async fn verify(&self, request: &VerificationRequest) -> Result<Verdict, VerifyError> {
        let text = render(request);
        let answer = answer_on_thread(move || ask(&text)).await?;
        let verdict = parse_answer(&answer);
        debug!(?verdict, "operator answered");
        Ok(verdict)
    }
}

/// Runs `read` on its own thread and awaits its result.  Dropping the
/// returned future abandons the thread.
async fn answer_on_thread<F>(read: F) -> Result<String, VerifyError>
where
    F: FnOnce() -> io::Result<String> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("lanshare-prompt".to_string())
        .spawn(move || {
            let _ = tx.send(read());
        })
        .map_err(|e| VerifyError::Prompt(e.to_string()))?;

    rx.await
        .map_err(|_| VerifyError::Prompt("prompt thread exited without an answer".to_string()))?
        .map_err(|e| VerifyError::Prompt(e.to_string()))
}

fn ask(text: &str) -> io::Result<String> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    drop(stdout);

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stdin closed before an answer was given",
        ));
    }
    Ok(line)
}

/// The text shown to the operator.
pub fn render(request: &VerificationRequest) -> String {
    format!(
        "\nNew device: {label}\n  fingerprint: {fp}\n\n  Verification words:  {sas}\n\n\
         Check that the other device shows the same words.\n\
         Trust this device? [y/N] ",
        label = request.peer_label,
        fp = request.peer_fingerprint.grouped(),
        sas = request.sas,
    )
}

/// Only an explicit yes accepts; anything else, including an empty line,
/// rejects.
pub fn parse_answer(answer: &str) -> Verdict {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Verdict::Accept,
        _ => Verdict::Reject,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanshare_core::{derive_sas, Identity, SasNonce, SasWordCount};

    #[test]
    fn test_only_explicit_yes_accepts() {
        for yes in ["y", "Y", "yes", " YES \n"] {
            assert_eq!(parse_answer(yes), Verdict::Accept, "{yes:?}");
        }
        for no in ["", "\n", "n", "no", "yep", "sure"] {
            assert_eq!(parse_answer(no), Verdict::Reject, "{no:?}");
        }
    }

    #[tokio::test]
    async fn test_answer_is_read_off_the_runtime() {
        let answer = answer_on_thread(|| Ok("yes\n".to_string())).await.unwrap();
        assert_eq!(parse_answer(&answer), Verdict::Accept);
    }

    #[tokio::test]
    async fn test_read_error_becomes_prompt_error() {
        let result = answer_on_thread(|| {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"))
        })
        .await;
        assert!(matches!(result, Err(VerifyError::Prompt(_))));
    }

    #[test]
    fn test_runtime_shuts_down_while_prompt_is_unanswered() {
        // Arrange: a read that outlives the verify deadline by far.
        let rt = tokio::runtime::Runtime::new().unwrap();
        let started = std::time::Instant::now();

        // Act
        let outcome = rt.block_on(async {
            tokio::time::timeout(
                std::time::Duration::from_millis(100),
                answer_on_thread(|| {
                    std::thread::sleep(std::time::Duration::from_secs(30));
                    Ok(String::new())
                }),
            )
            .await
        });
        drop(rt);

        // Assert
        assert!(outcome.is_err(), "the read should still be pending");
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_render_shows_label_fingerprint_and_words() {
        // Arrange
        let peer = Identity::generate();
        let sas = derive_sas(
            &peer.public_key_bytes(),
            &SasNonce::generate(),
            &SasNonce::generate(),
            SasWordCount::default(),
        )
        .unwrap();
        let request = VerificationRequest {
            peer_label: "alice-laptop".to_string(),
            peer_fingerprint: peer.fingerprint().clone(),
            sas: sas.clone(),
        };

        // Act
        let text = render(&request);

        // Assert
        assert!(text.contains("alice-laptop"));
        assert!(text.contains(&peer.fingerprint().grouped()));
        assert!(text.contains(&sas.to_string()));
        assert!(text.trim_end().ends_with("[y/N]"));
    }
}
