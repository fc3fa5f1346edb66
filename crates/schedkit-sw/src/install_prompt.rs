//! Deferred install prompt.
//!
//! The host hands over its "add to home screen" prompt when it first becomes
//! available; the page shows an install button while
//! [`InstallPromptController::is_deferrable`] is true and calls
//! [`InstallPromptController::trigger_install`] when it is clicked. A prompt
//! can be shown once.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::ServiceWorkerError;

/// The user's answer to an install prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallChoice {
    Accepted,
    Dismissed,
}

/// A prompt the host allowed us to postpone.
#[async_trait]
pub trait DeferredPrompt: Send + Sync {
    /// Show the prompt and wait for the user's choice.
    async fn prompt(&self) -> InstallChoice;
}

/// Owns at most one pending install prompt.
#[derive(Default)]
pub struct InstallPromptController {
    pending: Option<Box<dyn DeferredPrompt>>,
}

impl InstallPromptController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `prompt` for later, replacing any earlier one.
    pub fn defer(&mut self, prompt: Box<dyn DeferredPrompt>) {
        if self.pending.replace(prompt).is_some() {
            debug!("Replaced pending install prompt");
        }
    }

    /// Whether an install can be triggered right now.
    pub fn is_deferrable(&self) -> bool {
        self.pending.is_some()
    }

    /// Show the pending prompt. It is consumed whatever the user chooses.
    pub async fn trigger_install(&mut self) -> Result<InstallChoice, ServiceWorkerError> {
        let prompt = self
            .pending
            .take()
            .ok_or(ServiceWorkerError::NoPendingPrompt)?;
        let choice = prompt.prompt().await;
        info!(?choice, "Install prompt answered");
        Ok(choice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedPrompt {
        choice: InstallChoice,
        shown: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DeferredPrompt for ScriptedPrompt {
        async fn prompt(&self) -> InstallChoice {
            self.shown.fetch_add(1, Ordering::SeqCst);
            self.choice
        }
    }

    fn scripted(choice: InstallChoice, shown: &Arc<AtomicUsize>) -> Box<dyn DeferredPrompt> {
        Box::new(ScriptedPrompt {
            choice,
            shown: Arc::clone(shown),
        })
    }

    #[tokio::test]
    async fn test_nothing_pending() {
        let mut controller = InstallPromptController::new();
        assert!(!controller.is_deferrable());
        assert!(matches!(
            controller.trigger_install().await,
            Err(ServiceWorkerError::NoPendingPrompt)
        ));
    }

    #[tokio::test]
    async fn test_prompt_is_consumed() {
        let shown = Arc::new(AtomicUsize::new(0));
        let mut controller = InstallPromptController::new();
        controller.defer(scripted(InstallChoice::Dismissed, &shown));
        assert!(controller.is_deferrable());

        let choice = controller.trigger_install().await.unwrap();
        assert_eq!(choice, InstallChoice::Dismissed);
        assert!(!controller.is_deferrable());
        assert!(controller.trigger_install().await.is_err());
        assert_eq!(shown.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_latest_prompt_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut controller = InstallPromptController::new();
        controller.defer(scripted(InstallChoice::Dismissed, &first));
        controller.defer(scripted(InstallChoice::Accepted, &second));

        assert_eq!(
            controller.trigger_install().await.unwrap(),
            InstallChoice::Accepted
        );
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
