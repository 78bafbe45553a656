use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand};

use devcert::{
    CaOptions, CertificateAuthority, ConfigPaths, DomainOptions, PlatformServices, RcgenSigner,
    Settings, TrustOptions, current_driver, output,
};

/// devcert - trusted HTTPS certificates for local development
#[derive(Parser)]
#[command(name = "devcert")]
#[command(version)]
#[command(about = "devcert - trusted HTTPS certificates for local development")]
pub struct Cli {
    /// Show verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Args, Debug, Default, Clone)]
pub struct TrustArgs {
    /// Never install NSS tools through a package manager
    #[arg(long, env = "DEVCERT_SKIP_CERTUTIL_INSTALL")]
    pub skip_certutil_install: bool,

    /// Root certificate validity in days
    #[arg(long, value_name = "DAYS", value_parser = clap::value_parser!(u32).range(1..))]
    pub ca_validity_days: Option<u32>,
}

impl TrustArgs {
    fn trust_options(&self, settings: &Settings) -> TrustOptions {
        TrustOptions {
            skip_certutil_install: self.skip_certutil_install
                || settings.trust.skip_certutil_install,
        }
    }

    fn ca_options(&self, settings: &Settings) -> CaOptions {
        CaOptions {
            validity_days: self
                .ca_validity_days
                .unwrap_or(settings.ca.validity_days),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new root CA and trust it in the system and browser stores
    Install(TrustArgs),

    /// Remove the root CA, its trust-store entries and all domain certificates
    Uninstall,

    /// Install the root CA if missing, or repair an existing install
    Repair(TrustArgs),

    /// Print paths to a certificate for DOMAIN, issuing it if needed
    Cert {
        domain: String,

        /// Additional names the certificate should cover
        #[arg(long = "alt", value_name = "NAME")]
        alt: Vec<String>,

        /// Certificate validity in days
        #[arg(long, value_name = "DAYS", value_parser = clap::value_parser!(u32).range(1..))]
        validity_days: Option<u32>,

        #[command(flatten)]
        trust: TrustArgs,
    },

    /// List domains with issued certificates
    Domains,

    /// Delete the certificate for DOMAIN
    #[command(visible_alias = "rm")]
    Remove { domain: String },

    /// Map DOMAIN to 127.0.0.1 in the hosts file
    Hosts { domain: String },

    /// Print the root certificate path
    CaPath,
}

impl Cli {
    pub fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let Some(command) = self.command else {
            Cli::command().print_help()?;
            println!();
            return Ok(());
        };

        let paths = ConfigPaths::discover()?;
        let settings = Settings::load(&paths)?;

        // Printing the path needs no trust-store driver.
        if let Commands::CaPath = command {
            println!("{}", paths.ca_cert_path().display());
            return Ok(());
        }

        let driver = current_driver(paths.clone(), PlatformServices::system())?;
        let ca = CertificateAuthority::new(paths, driver, Arc::new(RcgenSigner));

        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(execute(&ca, &settings, command))
    }
}

async fn execute(
    ca: &CertificateAuthority,
    settings: &Settings,
    command: Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Install(args) => {
            output::section("Installing devcert root certificate authority");
            ca.install(&args.trust_options(settings), &args.ca_options(settings))
                .await?;
            output::success(&format!(
                "Root CA installed at {}",
                ca.ca_certificate_path().display()
            ));
        }
        Commands::Uninstall => {
            ca.uninstall().await?;
            output::success("Root CA and domain certificates removed");
        }
        Commands::Repair(args) => {
            ca.ensure_installed(&args.trust_options(settings), &args.ca_options(settings))
                .await?;
            output::success("Root CA is installed and readable");
        }
        Commands::Cert {
            domain,
            alt,
            validity_days,
            trust,
        } => {
            ca.ensure_installed(&trust.trust_options(settings), &trust.ca_options(settings))
                .await?;
            let options = DomainOptions {
                validity_days: validity_days.unwrap_or(settings.domains.validity_days),
            };
            let cert = ca.certificate_for(&domain, &alt, &options).await?;
            println!("{}", cert.cert_path.display());
            println!("{}", cert.key_path.display());
        }
        Commands::Domains => {
            let domains = ca.configured_domains()?;
            if domains.is_empty() {
                output::muted("No domain certificates");
            }
            for domain in domains {
                println!("{domain}");
            }
        }
        Commands::Remove { domain } => {
            ca.remove_domain(&domain)?;
            output::success(&format!("Removed certificate for {domain}"));
        }
        Commands::Hosts { domain } => {
            ca.driver()
                .add_domain_to_hosts_file_if_missing(&domain)
                .await?;
            output::success(&format!("{domain} resolves to 127.0.0.1"));
        }
        Commands::CaPath => println!("{}", ca.ca_certificate_path().display()),
    }
    Ok(())
}
