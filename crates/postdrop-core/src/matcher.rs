//! Alias matching
//!
//! Resolves envelope recipients to a previously issued alias. Recipients are
//! checked in declared order; the first one whose local part matches an
//! issued alias decides the association and the rest are not consulted.

use postdrop_storage::models::Alias;
use postdrop_storage::repository::AliasRepository;
use tracing::debug;

/// Resolve the owning alias for a delivery, if any.
///
/// The local part is the substring before `@` (the whole string when there is
/// no separator), compared case-sensitively against issued aliases; when a
/// local part has been reissued, the most recently issued record wins. Lookup
/// failures count as "no match" so an unavailable alias store never fails a
/// delivery.
pub async fn resolve_alias(repo: &dyn AliasRepository, recipients: &[String]) -> Option<Alias> {
    for recipient in recipients {
        let local_part = recipient.split('@').next().unwrap_or(recipient);

        match repo.find_latest_by_local_part(local_part).await {
            Ok(Some(alias)) => return Some(alias),
            Ok(None) => {}
            Err(e) => {
                debug!(recipient = %recipient, error = %e, "Alias lookup failed, treating as no match");
            }
        }
    }

    None
}
