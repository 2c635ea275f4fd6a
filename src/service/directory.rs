use regex::Regex;
use tracing::{debug, info};

use crate::db::models::{AccountRow, NewAccount};
use crate::db::sqlite::Store;
use crate::error::VelaError;
use crate::gateway::IdentityGateway;

/// An account listing enriched with the roles directly assumable from the
/// SSO session.
#[derive(Debug, Clone)]
pub struct AccountListing {
    pub account: AccountRow,
    pub sso_roles: Vec<String>,
}

/// How a caller-supplied account identifier should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Number,
    Name,
    Pattern,
}

/// Identifier precedence, preserved as an external contract: purely numeric
/// matches the account number, lowercase alphanumeric-and-hyphen matches the
/// exact name, anything else is a regular expression tried against both
/// fields.
pub fn classify_identifier(identifier: &str) -> IdentifierKind {
    if !identifier.is_empty() && identifier.bytes().all(|b| b.is_ascii_digit()) {
        IdentifierKind::Number
    } else if !identifier.is_empty()
        && identifier
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        IdentifierKind::Name
    } else {
        IdentifierKind::Pattern
    }
}

/// Resolve an identifier to the accounts it names within the realm. An
/// unknown realm yields an empty match set, not an error; exact lookups that
/// miss do the same.
pub async fn find_accounts(
    store: &Store,
    realm_name: &str,
    identifier: &str,
) -> Result<Vec<AccountRow>, VelaError> {
    let Some(realm) = store.find_realm(realm_name).await? else {
        return Ok(Vec::new());
    };

    match classify_identifier(identifier) {
        IdentifierKind::Number => Ok(store
            .find_account_by_number(realm.id, identifier)
            .await?
            .into_iter()
            .collect()),
        IdentifierKind::Name => Ok(store
            .find_account_by_name(realm.id, identifier)
            .await?
            .into_iter()
            .collect()),
        IdentifierKind::Pattern => {
            let regex = compile_pattern(identifier)?;
            let accounts = store.list_accounts(realm.id).await?;
            Ok(accounts
                .into_iter()
                .filter(|account| {
                    matches_at_start(&regex, &account.number)
                        || matches_at_start(&regex, &account.name)
                })
                .collect())
        }
    }
}

/// All accounts of the realm whose name matches `pattern`, with their SSO
/// role sets for display.
pub async fn list_accounts(
    store: &Store,
    realm_name: &str,
    pattern: &str,
) -> Result<Vec<AccountListing>, VelaError> {
    let Some(realm) = store.find_realm(realm_name).await? else {
        return Ok(Vec::new());
    };
    let regex = compile_pattern(pattern)?;

    let mut listings = Vec::new();
    for account in store.list_accounts(realm.id).await? {
        if !matches_at_start(&regex, &account.name) {
            continue;
        }
        let sso_roles = store.sso_role_names(account.id).await?;
        listings.push(AccountListing { account, sso_roles });
    }
    Ok(listings)
}

/// Replace the realm authorization's accounts and SSO-role sets with a fresh
/// listing from the identity provider. Returns how many accounts were
/// synchronized.
pub async fn synchronize_accounts<G: IdentityGateway>(
    store: &Store,
    gateway: &G,
    realm_name: &str,
    region: &str,
) -> Result<usize, VelaError> {
    let realm = store
        .find_realm(realm_name)
        .await?
        .ok_or_else(|| VelaError::not_found(format!("realm {realm_name} is not registered")))?;

    let authorization = store
        .find_authorization(realm.id, region)
        .await?
        .ok_or_else(|| {
            VelaError::not_found(format!(
                "not authorized to realm {realm_name} in region {region}; run authorization first"
            ))
        })?;

    let access_token = authorization.client_access_token.as_deref().ok_or_else(|| {
        VelaError::not_found(format!(
            "no SSO session token for realm {realm_name} in region {region}; run authorization first"
        ))
    })?;

    let summaries = gateway.list_accounts(access_token, region).await?;
    debug!(realm = %realm_name, count = summaries.len(), "fetched account listing");

    let mut staged = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let sso_roles = gateway
            .list_account_roles(access_token, &summary.number, region)
            .await?;
        staged.push(NewAccount {
            number: summary.number,
            name: summary.name,
            email: summary.email,
            sso_roles,
        });
    }

    let count = store
        .replace_accounts(authorization.id, realm.id, &staged)
        .await?;
    info!(realm = %realm_name, region = %region, count, "accounts synchronized");
    Ok(count)
}

fn compile_pattern(pattern: &str) -> Result<Regex, VelaError> {
    Regex::new(pattern)
        .map_err(|e| VelaError::validation(format!("invalid account pattern {pattern}: {e}")))
}

/// Match anchored at the start of the haystack, the semantics exact-match
/// callers of the identifier contract rely on.
fn matches_at_start(regex: &Regex, haystack: &str) -> bool {
    regex.find(haystack).is_some_and(|m| m.start() == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_identifiers_are_numbers() {
        assert_eq!(classify_identifier("123456789012"), IdentifierKind::Number);
    }

    #[test]
    fn lowercase_hyphenated_identifiers_are_names() {
        assert_eq!(classify_identifier("acme-prod"), IdentifierKind::Name);
        assert_eq!(classify_identifier("acme2"), IdentifierKind::Name);
    }

    #[test]
    fn everything_else_is_a_pattern() {
        assert_eq!(classify_identifier("^acme-.*$"), IdentifierKind::Pattern);
        assert_eq!(classify_identifier("Acme"), IdentifierKind::Pattern);
        assert_eq!(classify_identifier(""), IdentifierKind::Pattern);
    }

    #[test]
    fn pattern_matching_is_anchored_at_the_start() {
        let regex = Regex::new("prod").unwrap();
        assert!(matches_at_start(&regex, "prod-eu"));
        assert!(!matches_at_start(&regex, "acme-prod"));
    }
}
