//! Browser liveness checks.
//!
//! NSS databases must not be modified while the owning browser is running.

use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};
use tracing::debug;

use crate::ui::UserInterface;

pub const FIREFOX_PROCESS: &str = "firefox";

/// How often a running browser is re-checked.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub trait ProcessProbe: Send + Sync {
    fn is_running(&self, process_name: &str) -> bool;
}

/// Inspects the live process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

impl ProcessProbe for SysinfoProbe {
    fn is_running(&self, process_name: &str) -> bool {
        let needle = process_name.to_lowercase();
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);
        sys.processes().values().any(|process| {
            process
                .name()
                .to_string_lossy()
                .to_lowercase()
                .contains(&needle)
        })
    }
}

/// Wait until Firefox has exited, prompting the user once if it is running.
///
/// There is no upper bound on the wait.
pub async fn ensure_firefox_closed(probe: &dyn ProcessProbe, ui: &dyn UserInterface) {
    wait_until_closed(probe, ui, FIREFOX_PROCESS, POLL_INTERVAL).await;
}

pub(crate) async fn wait_until_closed(
    probe: &dyn ProcessProbe,
    ui: &dyn UserInterface,
    process_name: &str,
    interval: Duration,
) {
    if !probe.is_running(process_name) {
        return;
    }

    ui.close_firefox_before_continuing();
    debug!(process = process_name, "Waiting for browser to exit");
    while probe.is_running(process_name) {
        tokio::time::sleep(interval).await;
    }
    debug!(process = process_name, "Browser exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProbe, ScriptedUi, UiEvent};

    #[tokio::test]
    async fn closed_browser_does_not_prompt() {
        let probe = FakeProbe::running_for(0);
        let ui = ScriptedUi::new();
        wait_until_closed(&probe, &ui, FIREFOX_PROCESS, Duration::from_millis(1)).await;
        assert!(ui.events().is_empty());
        assert_eq!(probe.checks(), 1);
    }

    #[tokio::test]
    async fn running_browser_prompts_once_and_polls_until_exit() {
        let probe = FakeProbe::running_for(3);
        let ui = ScriptedUi::new();
        wait_until_closed(&probe, &ui, FIREFOX_PROCESS, Duration::from_millis(1)).await;
        assert_eq!(ui.events(), vec![UiEvent::CloseFirefoxPrompt]);
        assert_eq!(probe.checks(), 4);
    }

    #[test]
    fn sysinfo_probe_does_not_find_nonexistent_process() {
        assert!(!SysinfoProbe.is_running("devcert-no-such-process-name"));
    }
}
