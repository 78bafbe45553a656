//! In-memory doubles for the process, terminal and trust-store seams.
//!
//! Used by unit tests and by the scenarios under `tests/`.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::browser::ProcessProbe;
use crate::command::{CommandOutput, CommandRunner, Invocation};
use crate::config::TrustOptions;
use crate::error::{DevcertError, Result};
use crate::paths::ConfigPaths;
use crate::platform::TrustStoreDriver;
use crate::protected::{PermissionProtectedFiles, ProtectedFileStore};
use crate::ui::UserInterface;

#[derive(Default)]
struct RunnerState {
    invocations: Vec<Invocation>,
    spawned: Vec<Invocation>,
    failures: Vec<String>,
    responses: Vec<(String, Vec<u8>)>,
    programs: Vec<String>,
    nss: HashMap<String, Vec<String>>,
}

/// Records every invocation and emulates the handful of tools drivers rely on:
/// `certutil` against in-memory NSS databases, `tee -a`, `cp` and `rm -f`.
#[derive(Default)]
pub struct RecordingRunner {
    state: Mutex<RunnerState>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `program` as present on `PATH`.
    pub fn make_available(&self, program: &str) {
        self.state.lock().programs.push(program.to_string());
    }

    /// Fail every invocation whose rendered command line contains `needle`.
    pub fn fail_when_contains(&self, needle: &str) {
        self.state.lock().failures.push(needle.to_string());
    }

    /// Answer invocations containing `needle` with `stdout`.
    pub fn respond_with(&self, needle: &str, stdout: &str) {
        self.state
            .lock()
            .responses
            .push((needle.to_string(), stdout.as_bytes().to_vec()));
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().invocations.clone()
    }

    pub fn spawned(&self) -> Vec<Invocation> {
        self.state.lock().spawned.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.invocations().iter().map(|i| i.to_string()).collect()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(needle)).count()
    }

    /// The argument following `flag` in every recorded invocation that has one.
    pub fn argument_after(&self, flag: &str) -> Vec<String> {
        self.invocations()
            .iter()
            .filter_map(|inv| {
                let pos = inv.args.iter().position(|a| a == flag)?;
                inv.args.get(pos + 1).cloned()
            })
            .collect()
    }

    pub fn nss_nickname_count(&self, address: &str, nickname: &str) -> usize {
        self.state
            .lock()
            .nss
            .get(address)
            .map(|names| names.iter().filter(|n| *n == nickname).count())
            .unwrap_or(0)
    }

    fn emulate(&self, invocation: &Invocation) -> Result<()> {
        let (program, args) = invocation.unelevated();
        let fail = |message: String| DevcertError::tool(invocation.to_string(), message);
        let after = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };

        if program.ends_with("certutil")
            && let (Some(address), Some(nickname)) = (after("-d"), after("-n"))
        {
            let mut state = self.state.lock();
            let names = state.nss.entry(address).or_default();
            match args.first().map(String::as_str) {
                Some("-A") => {
                    names.retain(|n| *n != nickname);
                    names.push(nickname);
                }
                Some("-D") | Some("-L") if !names.contains(&nickname) => {
                    return Err(fail(format!("could not find certificate named {nickname}")));
                }
                Some("-D") => names.retain(|n| *n != nickname),
                _ => {}
            }
            return Ok(());
        }

        match (program, args) {
            ("tee", [flag, path]) if flag == "-a" => {
                let mut file = fs::OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .map_err(|e| fail(e.to_string()))?;
                file.write_all(invocation.stdin.as_deref().unwrap_or_default())
                    .map_err(|e| fail(e.to_string()))?;
            }
            ("cp", [from, to]) => {
                fs::copy(from, to).map_err(|e| fail(e.to_string()))?;
            }
            ("rm", [flag, path]) if flag == "-f" => match fs::remove_file(path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    return Err(fail(e.to_string()));
                }
                _ => {}
            },
            _ => {}
        }
        Ok(())
    }

    fn check_failure(&self, invocation: &Invocation) -> Result<()> {
        let rendered = invocation.to_string();
        let failing = self
            .state
            .lock()
            .failures
            .iter()
            .any(|needle| rendered.contains(needle));
        if failing {
            return Err(DevcertError::tool(rendered, "simulated failure"));
        }
        Ok(())
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.state.lock().invocations.push(invocation.clone());
        self.check_failure(invocation)?;
        self.emulate(invocation)?;

        let rendered = invocation.to_string();
        let stdout = self
            .state
            .lock()
            .responses
            .iter()
            .find(|(needle, _)| rendered.contains(needle))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok(CommandOutput {
            stdout,
            stderr: Vec::new(),
        })
    }

    fn spawn(&self, invocation: &Invocation) -> Result<()> {
        self.state.lock().spawned.push(invocation.clone());
        self.check_failure(invocation)
    }

    fn command_exists(&self, program: &str) -> bool {
        self.state.lock().programs.iter().any(|p| p == program)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    PasswordPrompt,
    ChromeWarning,
    CloseFirefoxPrompt,
    WindowsRemovalWarning,
    WizardStarted(String),
    WizardPage(String),
    WizardFinished,
}

/// A raw HTTP response captured by [`ScriptedUi`] while the wizard is open.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub path: String,
    pub head: String,
    pub body: Vec<u8>,
}

/// Answers prompts from a script and records what was shown.
#[derive(Default)]
pub struct ScriptedUi {
    events: Mutex<Vec<UiEvent>>,
    passwords: Mutex<VecDeque<String>>,
    fetch_on_wait: Vec<String>,
    fetched: Mutex<Vec<FetchedResponse>>,
    host: Mutex<Option<String>>,
}

impl ScriptedUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_passwords<I, S>(mut self, passwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.passwords = Mutex::new(passwords.into_iter().map(Into::into).collect());
        self
    }

    /// While waiting for the wizard, fetch these paths from the wizard server.
    pub fn fetching<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fetch_on_wait = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().clone()
    }

    pub fn fetched(&self) -> Vec<FetchedResponse> {
        self.fetched.lock().clone()
    }

    /// The wizard URL announced by the most recent wizard run.
    pub fn wizard_host(&self) -> Option<String> {
        self.host.lock().clone()
    }

    fn record(&self, event: UiEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl UserInterface for ScriptedUi {
    async fn encryption_password(&self) -> Result<String> {
        self.record(UiEvent::PasswordPrompt);
        self.passwords
            .lock()
            .pop_front()
            .ok_or_else(|| DevcertError::Prompt("no scripted password left".to_string()))
    }

    fn warn_chrome_without_certutil(&self) {
        self.record(UiEvent::ChromeWarning);
    }

    fn close_firefox_before_continuing(&self) {
        self.record(UiEvent::CloseFirefoxPrompt);
    }

    fn warn_removing_windows_certificate(&self) {
        self.record(UiEvent::WindowsRemovalWarning);
    }

    async fn start_firefox_wizard(&self, certificate_host: &str) -> Result<()> {
        *self.host.lock() = Some(certificate_host.to_string());
        self.record(UiEvent::WizardStarted(certificate_host.to_string()));
        Ok(())
    }

    fn firefox_wizard_prompt_page(&self, certificate_url: &str) -> String {
        self.record(UiEvent::WizardPage(certificate_url.to_string()));
        format!("<a href=\"{certificate_url}\">certificate</a>")
    }

    async fn wait_for_firefox_wizard(&self) -> Result<()> {
        let host = self.wizard_host();
        if let Some(host) = host {
            for path in &self.fetch_on_wait {
                let response = http_get(&host, path).await?;
                self.fetched.lock().push(response);
            }
        }
        self.record(UiEvent::WizardFinished);
        Ok(())
    }
}

/// Minimal HTTP/1.1 GET against a `http://localhost:<port>` base URL.
pub async fn http_get(base: &str, path: &str) -> Result<FetchedResponse> {
    let authority = base
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .replace("localhost", "127.0.0.1");
    let mut stream = tokio::net::TcpStream::connect(&authority).await?;
    let request =
        format!("GET {path} HTTP/1.1\r\nHost: {authority}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(raw.len());
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let body = raw.get(split + 4..).unwrap_or_default().to_vec();
    Ok(FetchedResponse {
        path: path.to_string(),
        head,
        body,
    })
}

/// Reports a process as running for a fixed number of checks.
pub struct FakeProbe {
    remaining: AtomicUsize,
    checks: AtomicUsize,
}

impl FakeProbe {
    pub fn running_for(checks: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(checks),
            checks: AtomicUsize::new(0),
        }
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl ProcessProbe for FakeProbe {
    fn is_running(&self, _process_name: &str) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustEvent {
    Add(PathBuf),
    Remove(PathBuf),
    Hosts(String),
}

/// Trust-store driver that records calls and keeps protected files on disk.
pub struct RecordingDriver {
    events: Mutex<Vec<TrustEvent>>,
    files: PermissionProtectedFiles,
}

impl RecordingDriver {
    pub fn new(paths: ConfigPaths) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            files: PermissionProtectedFiles::new(paths, Arc::new(RecordingRunner::new())),
        }
    }

    pub fn events(&self) -> Vec<TrustEvent> {
        self.events.lock().clone()
    }

    pub fn adds(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, TrustEvent::Add(_)))
            .count()
    }

    pub fn removes(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, TrustEvent::Remove(_)))
            .count()
    }
}

#[async_trait]
impl TrustStoreDriver for RecordingDriver {
    async fn add_to_trust_stores(&self, cert_path: &Path, _options: &TrustOptions) -> Result<()> {
        self.events
            .lock()
            .push(TrustEvent::Add(cert_path.to_path_buf()));
        Ok(())
    }

    async fn remove_from_trust_stores(&self, cert_path: &Path) -> Result<()> {
        self.events
            .lock()
            .push(TrustEvent::Remove(cert_path.to_path_buf()));
        Ok(())
    }

    async fn add_domain_to_hosts_file_if_missing(&self, domain: &str) -> Result<()> {
        self.events.lock().push(TrustEvent::Hosts(domain.to_string()));
        Ok(())
    }

    async fn read_protected(&self, path: &Path) -> Result<Vec<u8>> {
        self.files.read(path).await
    }

    async fn write_protected(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.files.write(path, contents).await
    }

    fn delete_protected(&self, path: &Path) -> Result<()> {
        self.files.delete(path)
    }
}
