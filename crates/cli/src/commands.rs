//! Command handlers. Each renders its result as pretty JSON to `out`.

use std::io::Write;

use anyhow::Context;
use certdesk_client::{CertificateFilter, CertificateQueries, ExportRequest, FileFilter};
use certdesk_core::{InfiniteQueryObserver, QueryOptions};
use serde::Serialize;

use crate::args::{self, Command};
use crate::session::Session;

pub async fn run(session: &Session, command: Command, out: &mut dyn Write) -> anyhow::Result<()> {
    match command {
        Command::List { filter, all } => {
            let filter = CertificateFilter::from(filter);
            let key = CertificateQueries::list_key(filter.cert_type);
            let list = session.queries.list_blocking()?;
            let mut observer = list.use_query(&key, Some(filter), QueryOptions::default()).await?;
            if all {
                drain(&mut observer).await?;
            }
            print_json(out, &observer.data())
        }
        Command::Show { id } => {
            let detail = session.queries.detail_blocking();
            let result = detail.use_query(&CertificateQueries::detail_base(), Some(id), QueryOptions::default()).await?;
            print_json(out, &*result.data)
        }
        Command::Add { name, cert_type, domains, store, source, auto_renew } => {
            let cert = args::new_certificate(name, cert_type, domains, store, source, auto_renew);
            let created = session.mutations(cert_type.into()).create.mutate(cert).await?;
            print_json(out, &created)
        }
        Command::Edit { id, cert_type, name, domains, store, auto_renew } => {
            let update = args::certificate_update(id, name, domains, store, auto_renew);
            let updated = session.mutations(cert_type.into()).update.mutate(update).await?;
            print_json(out, &updated)
        }
        Command::Apply { id, cert_type } => {
            let cert = session.mutations(cert_type.into()).apply.mutate(id).await?;
            print_json(out, &cert)
        }
        Command::Reapply { id, cert_type } => {
            let cert = session.mutations(cert_type.into()).reapply.mutate(id).await?;
            print_json(out, &cert)
        }
        Command::Delete { id, cert_type } => {
            session.mutations(cert_type.into()).delete.mutate(id.clone()).await?;
            print_json(out, &serde_json::json!({ "deleted": id }))
        }
        Command::Export { ids, format, output } => {
            let req = ExportRequest { ids, format: format.into() };
            let bytes = session.api.export_certificates(&req).await?;
            tokio::fs::write(&output, &bytes).await.with_context(|| format!("writing {}", output.display()))?;
            tracing::info!(path = %output.display(), bytes = bytes.len(), "export written");
            print_json(out, &serde_json::json!({ "path": output, "bytes": bytes.len() }))
        }
        Command::Files { path, all } => {
            let files = session.queries.files()?;
            let mut observer =
                files.use_query(&CertificateQueries::files_key(), Some(FileFilter { path }), QueryOptions::default()).await?;
            if all {
                drain(&mut observer).await?;
            }
            print_json(out, &observer.data())
        }
    }
}

/// Fetch pages until the last one. Stops at the first failed page.
async fn drain<T, C>(observer: &mut InfiniteQueryObserver<T, C>) -> anyhow::Result<()>
where
    T: Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    while observer.fetch_next_page() {
        observer.settled().await?;
        if let Some(err) = observer.error() {
            return Err(err.into());
        }
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("rendering output")?;
    writeln!(out, "{rendered}")?;
    Ok(())
}
