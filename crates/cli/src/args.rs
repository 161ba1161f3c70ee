//! Command-line surface for `certdesk`.

use std::path::PathBuf;

use certdesk_client::{CertificateFilter, CertificateType, CertificateUpdate, ExportFormat, NewCertificate};
use certdesk_core::AppConfig;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "certdesk", version, about = "Certificate management console", long_about = None)]
pub struct Cli {
    /// API base URL
    #[arg(long, env = "CERTDESK_API_BASE_URL")]
    pub api_url: Option<String>,

    /// Page size for list requests
    #[arg(long, env = "CERTDESK_PAGE_SIZE")]
    pub page_size: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, mut config: AppConfig) -> AppConfig {
        if let Some(url) = &self.api_url {
            config.api_base_url = url.clone();
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        config
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List and search certificates
    List {
        #[command(flatten)]
        filter: FilterArgs,
        /// Fetch every page instead of the first
        #[arg(long)]
        all: bool,
    },
    /// Show one certificate
    Show { id: String },
    /// Create a certificate
    Add {
        #[arg(long)]
        name: String,
        #[arg(long = "type", value_enum)]
        cert_type: TypeArg,
        /// Domain to cover; repeat for several
        #[arg(long = "domain")]
        domains: Vec<String>,
        #[arg(long)]
        store: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        auto_renew: bool,
    },
    /// Change a certificate's settings
    Edit {
        id: String,
        #[arg(long = "type", value_enum, default_value_t = TypeArg::Websites)]
        cert_type: TypeArg,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "domain")]
        domains: Vec<String>,
        #[arg(long)]
        store: Option<String>,
        #[arg(long)]
        auto_renew: Option<bool>,
    },
    /// Request issuance
    Apply {
        id: String,
        #[arg(long = "type", value_enum, default_value_t = TypeArg::Websites)]
        cert_type: TypeArg,
    },
    /// Reissue an existing certificate
    Reapply {
        id: String,
        #[arg(long = "type", value_enum, default_value_t = TypeArg::Websites)]
        cert_type: TypeArg,
    },
    /// Delete a certificate
    Delete {
        id: String,
        #[arg(long = "type", value_enum, default_value_t = TypeArg::Websites)]
        cert_type: TypeArg,
    },
    /// Export certificates to a file
    Export {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long, value_enum, default_value_t = FormatArg::Pem)]
        format: FormatArg,
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Browse the server's certificate files
    Files {
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        all: bool,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct FilterArgs {
    #[arg(long = "type", value_enum)]
    pub cert_type: Option<TypeArg>,
    #[arg(long)]
    pub keyword: Option<String>,
    #[arg(long)]
    pub store: Option<String>,
    #[arg(long)]
    pub source: Option<String>,
}

impl From<FilterArgs> for CertificateFilter {
    fn from(args: FilterArgs) -> Self {
        Self {
            cert_type: args.cert_type.map(Into::into),
            keyword: args.keyword.filter(|k| !k.trim().is_empty()),
            store: args.store,
            source: args.source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TypeArg {
    Websites,
    Ssh,
    Ca,
    Client,
}

impl From<TypeArg> for CertificateType {
    fn from(arg: TypeArg) -> Self {
        match arg {
            TypeArg::Websites => CertificateType::Websites,
            TypeArg::Ssh => CertificateType::Ssh,
            TypeArg::Ca => CertificateType::Ca,
            TypeArg::Client => CertificateType::Client,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Pem,
    Pfx,
    Zip,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Pem => ExportFormat::Pem,
            FormatArg::Pfx => ExportFormat::Pfx,
            FormatArg::Zip => ExportFormat::Zip,
        }
    }
}

pub fn new_certificate(
    name: String, cert_type: TypeArg, domains: Vec<String>, store: Option<String>, source: Option<String>,
    auto_renew: bool,
) -> NewCertificate {
    NewCertificate { name, cert_type: cert_type.into(), domains, store, source, auto_renew }
}

pub fn certificate_update(
    id: String, name: Option<String>, domains: Vec<String>, store: Option<String>, auto_renew: Option<bool>,
) -> CertificateUpdate {
    CertificateUpdate { id, name, domains: (!domains.is_empty()).then_some(domains), store, auto_renew }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_list_with_filter() {
        let cli = Cli::try_parse_from(["certdesk", "list", "--type", "ssh", "--keyword", "prod", "--all"]).unwrap();
        let Command::List { filter, all } = cli.command else {
            panic!("expected list");
        };
        assert!(all);
        let filter = CertificateFilter::from(filter);
        assert_eq!(filter.cert_type, Some(CertificateType::Ssh));
        assert_eq!(filter.keyword.as_deref(), Some("prod"));
    }

    #[test]
    fn test_blank_keyword_dropped() {
        let filter = CertificateFilter::from(FilterArgs { keyword: Some("  ".into()), ..Default::default() });
        assert!(filter.keyword.is_none());
    }

    #[test]
    fn test_parse_add_collects_domains() {
        let cli = Cli::try_parse_from([
            "certdesk", "add", "--name", "shop", "--type", "websites", "--domain", "a.example.com", "--domain",
            "b.example.com",
        ])
        .unwrap();
        let Command::Add { domains, cert_type, auto_renew, .. } = cli.command else {
            panic!("expected add");
        };
        assert_eq!(domains, vec!["a.example.com", "b.example.com"]);
        assert_eq!(cert_type, TypeArg::Websites);
        assert!(!auto_renew);
    }

    #[test]
    fn test_add_requires_type() {
        assert!(Cli::try_parse_from(["certdesk", "add", "--name", "shop"]).is_err());
    }

    #[test]
    fn test_export_requires_ids_and_output() {
        assert!(Cli::try_parse_from(["certdesk", "export", "--output", "out.pem"]).is_err());
        assert!(Cli::try_parse_from(["certdesk", "export", "c1"]).is_err());
        let cli = Cli::try_parse_from(["certdesk", "export", "c1", "c2", "--format", "zip", "-o", "out.zip"]).unwrap();
        assert!(matches!(cli.command, Command::Export { format: FormatArg::Zip, .. }));
    }

    #[test]
    fn test_overrides_replace_config() {
        let cli = Cli::try_parse_from(["certdesk", "--api-url", "https://certs.internal/api", "--page-size", "50", "files"])
            .unwrap();
        let config = cli.apply_overrides(AppConfig::default());
        assert_eq!(config.api_base_url, "https://certs.internal/api");
        assert_eq!(config.page_size, 50);
    }

    #[test]
    fn test_overrides_bound_to_env() {
        let command = Cli::command();
        let env_of = |id: &str| {
            command.get_arguments().find(|arg| arg.get_id() == id).and_then(|arg| arg.get_env()).map(|env| env.to_owned())
        };
        assert_eq!(env_of("api_url").as_deref(), Some(std::ffi::OsStr::new("CERTDESK_API_BASE_URL")));
        assert_eq!(env_of("page_size").as_deref(), Some(std::ffi::OsStr::new("CERTDESK_PAGE_SIZE")));
    }

    #[test]
    fn test_update_without_domains_leaves_them() {
        let update = certificate_update("c1".into(), None, Vec::new(), None, Some(true));
        assert!(update.domains.is_none());
        assert_eq!(update.auto_renew, Some(true));
    }
}
