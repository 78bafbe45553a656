//! Interactive prompts shown while trust stores are being modified.

use async_trait::async_trait;

use crate::error::{DevcertError, Result};
use crate::output;

pub const PASSWORD_PROMPT: &str = "devcert password";

#[async_trait]
pub trait UserInterface: Send + Sync {
    /// Password for encrypted protected files.
    async fn encryption_password(&self) -> Result<String>;

    /// Chrome is installed but certutil is missing, so Chrome will keep warning.
    fn warn_chrome_without_certutil(&self);

    /// Firefox is running and must be closed before its NSS databases are touched.
    fn close_firefox_before_continuing(&self);

    /// Windows is about to remove the root certificate from the user store.
    fn warn_removing_windows_certificate(&self);

    /// Explain the manual Firefox steps before the browser is opened at `certificate_host`.
    async fn start_firefox_wizard(&self, certificate_host: &str) -> Result<()>;

    /// HTML body of the page served on every wizard path except the certificate itself.
    fn firefox_wizard_prompt_page(&self, certificate_url: &str) -> String;

    /// Block until the user has finished the wizard.
    async fn wait_for_firefox_wizard(&self) -> Result<()>;
}

/// Prompts on the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalUi;

async fn blocking_prompt<T, F>(prompt: F) -> Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(prompt)
        .await
        .map_err(|e| DevcertError::Prompt(e.to_string()))?
        .map_err(|e| DevcertError::Prompt(e.to_string()))
}

#[async_trait]
impl UserInterface for TerminalUi {
    async fn encryption_password(&self) -> Result<String> {
        blocking_prompt(|| output::prompt_password(PASSWORD_PROMPT)).await
    }

    fn warn_chrome_without_certutil(&self) {
        output::warning(
            "Chrome is installed but the certutil tool is not available. Certificates signed \
             by devcert will still work, but Chrome will continue to warn you that they are \
             untrusted. Install certutil (libnss3-tools) and rerun to fix this.",
        );
    }

    fn close_firefox_before_continuing(&self) {
        output::warning("Please close Firefox before continuing");
    }

    fn warn_removing_windows_certificate(&self) {
        output::warning(
            "Removing the devcert root certificate from your Windows user store. You may see \
             a confirmation dialog; choose \"Yes\" to remove it.",
        );
    }

    async fn start_firefox_wizard(&self, certificate_host: &str) -> Result<()> {
        output::section("Firefox needs to trust the devcert certificate authority");
        output::step(
            "devcert could not find the certutil tool, so Firefox has to be configured by hand.",
        );
        output::step(&format!(
            "A Firefox window will open at {certificate_host}. Follow the instructions on \
             the page, then come back here."
        ));
        blocking_prompt(|| output::wait_for_key("Press any key to open Firefox")).await
    }

    fn firefox_wizard_prompt_page(&self, certificate_url: &str) -> String {
        format!(
            r#"<h1>Trust the devcert certificate authority</h1>
<ol>
  <li>If the download does not start, click <a href="{certificate_url}">this link</a>.</li>
  <li>In the dialog that opens, check "Trust this CA to identify websites".</li>
  <li>Click "OK", close this tab and return to your terminal.</li>
</ol>
"#
        )
    }

    async fn wait_for_firefox_wizard(&self) -> Result<()> {
        blocking_prompt(|| {
            output::wait_for_key("Press any key once Firefox trusts the certificate")
        })
        .await
    }
}
