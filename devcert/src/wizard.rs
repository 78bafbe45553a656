//! Manual Firefox trust flow.
//!
//! When certutil is unavailable, Firefox is pointed at a throwaway local HTTP
//! server that hands out the root certificate with a CA MIME type, which makes
//! Firefox open its own "trust this CA" dialog.

use std::convert::Infallible;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::{CommandRunner, Invocation};
use crate::error::{DevcertError, Result};
use crate::ui::UserInterface;

pub const CERTIFICATE_PATH: &str = "/certificate";
const CA_CERT_MIME: &str = "application/x-x509-ca-cert";

/// How to open a URL in the target browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserLaunch {
    program: String,
    args: Vec<String>,
}

impl BrowserLaunch {
    /// Run the browser executable directly with the URL as its only argument.
    pub fn binary(path: impl AsRef<Path>) -> Self {
        Self {
            program: path.as_ref().display().to_string(),
            args: Vec::new(),
        }
    }

    /// Run a launcher command, appending the URL to `args`.
    pub fn command<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn invocation(&self, url: &str) -> Invocation {
        let mut args = self.args.clone();
        args.push(url.to_string());
        Invocation::new(self.program.clone(), args)
    }
}

#[derive(Clone)]
struct Pages {
    certificate: Bytes,
    landing: Bytes,
}

impl Pages {
    fn respond(&self, path: &str) -> Response<Full<Bytes>> {
        let (body, content_type) = if path == CERTIFICATE_PATH {
            (self.certificate.clone(), CA_CERT_MIME)
        } else {
            (self.landing.clone(), "text/html; charset=utf-8")
        };
        let mut response = Response::new(Full::new(body));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        response
    }
}

fn landing_page(certificate_url: &str, instructions: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <meta http-equiv="refresh" content="0; url={certificate_url}">
    <title>devcert</title>
  </head>
  <body>
{instructions}
  </body>
</html>
"#
    )
}

/// Serves the certificate until closed. Dropping it also stops the accept loop.
struct CertificateServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl CertificateServer {
    async fn start(certificate: Vec<u8>, ui: &dyn UserInterface) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let certificate_url = format!("http://localhost:{}{CERTIFICATE_PATH}", addr.port());
        let instructions = ui.firefox_wizard_prompt_page(&certificate_url);
        let pages = Pages {
            certificate: Bytes::from(certificate),
            landing: Bytes::from(landing_page(&certificate_url, &instructions)),
        };

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _)) => {
                                let pages = pages.clone();
                                tokio::spawn(async move {
                                    let service = service_fn(move |req: Request<Incoming>| {
                                        let response = pages.respond(req.uri().path());
                                        async move { Ok::<_, Infallible>(response) }
                                    });
                                    if let Err(e) = http1::Builder::new()
                                        .serve_connection(TokioIo::new(stream), service)
                                        .await
                                    {
                                        debug!(error = %e, "Wizard connection ended with error");
                                    }
                                });
                            }
                            Err(e) => warn!(error = %e, "Wizard accept failed"),
                        }
                    }
                }
            }
        });

        debug!(%addr, "Certificate wizard server listening");
        Ok(Self {
            addr,
            shutdown,
            task: Some(task),
        })
    }

    fn root_url(&self) -> String {
        format!("http://localhost:{}", self.addr.port())
    }

    async fn close(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for CertificateServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Walk the user through trusting `cert_path` in Firefox by hand.
///
/// The local server stays up until the user confirms, and is closed before
/// returning on every path.
pub async fn run_manual_firefox_trust_flow(
    runner: &dyn CommandRunner,
    ui: &dyn UserInterface,
    browser: &BrowserLaunch,
    cert_path: &Path,
) -> Result<()> {
    let certificate =
        fs::read(cert_path).map_err(|e| DevcertError::FileRead(cert_path.to_path_buf(), e))?;
    let server = CertificateServer::start(certificate, ui).await?;
    let root = server.root_url();

    let result = async {
        ui.start_firefox_wizard(&root).await?;
        runner
            .spawn(&browser.invocation(&root))
            .map_err(|e| DevcertError::BrowserLaunchFailure(e.to_string()))?;
        ui.wait_for_firefox_wizard().await
    }
    .await;

    server.close().await;
    result
}
