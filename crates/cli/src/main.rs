//! `scepd`: offline CA administration — bootstrap or inspect a keystore
//! without starting the HTTP server.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use der::Encode;
use scepd_core::keystore::{BootstrapPolicy, CaHandle, CaStore, FileCaStore};

#[derive(Parser)]
#[command(name = "scepd", about = "Offline administration for a scepd CA keystore")]
struct Cli {
    /// Directory containing `ca.key`, `ca.pem`, `serial`.
    #[arg(long, env = "CA_ROOT", default_value = "./ca")]
    ca_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap a new CA keystore if one does not already exist at `--ca-root`.
    Ca {
        #[command(subcommand)]
        action: CaAction,
    },
}

#[derive(Subcommand)]
enum CaAction {
    /// Generate (or load, if already present) the CA key and self-signed certificate.
    Init {
        #[arg(long, default_value_t = 2048)]
        key_bits: usize,
        #[arg(long, default_value = "SCEP CA")]
        common_name: String,
        #[arg(long, default_value_t = 3650)]
        lifetime_days: i64,
    },
    /// Print the CA's subject, serial counter, and validity.
    Show,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let store = FileCaStore::new(&cli.ca_root);

    match cli.command {
        Commands::Ca {
            action:
                CaAction::Init {
                    key_bits,
                    common_name,
                    lifetime_days,
                },
        } => {
            let policy = BootstrapPolicy {
                key_bits,
                common_name,
                lifetime_days,
            };
            let ca = CaHandle::open(&store, &policy)
                .with_context(|| format!("opening CA keystore at {}", cli.ca_root.display()))?;
            println!("CA ready at {}", cli.ca_root.display());
            println!(" subject: {}", ca.subject());
            Ok(())
        }
        Commands::Ca {
            action: CaAction::Show,
        } => {
            let ca = CaHandle::open(&store, &BootstrapPolicy::default())
                .with_context(|| format!("opening CA keystore at {}", cli.ca_root.display()))?;
            let serial = store
                .load_serial()
                .context("reading serial counter")?;
            let der_len = ca
                .certificate()
                .to_der()
                .context("encoding CA certificate")?
                .len();

            println!("subject: {}", ca.subject());
            println!("issuer: {}", ca.certificate().tbs_certificate.issuer);
            println!(
                "validity: {:?}.. {:?}",
                ca.certificate().tbs_certificate.validity.not_before,
                ca.certificate().tbs_certificate.validity.not_after
            );
            println!("next serial: {serial}");
            println!("certificate: {der_len} bytes DER");
            Ok(())
        }
    }
}
