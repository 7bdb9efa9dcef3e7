// ABOUTME: Utility functions for validation, retries and call timeouts
// ABOUTME: Provides identifier validation, quoting, backoff retry and bounded calls

use anyhow::{anyhow, bail, Result};
use std::future::Future;
use std::time::Duration;

/// Maximum identifier length accepted for tables and columns (MySQL limit)
const MAX_IDENTIFIER_LEN: usize = 64;

/// Validate a table, column or dataset name before it is spliced into SQL
///
/// Identifiers must contain only:
/// - Letters (a-z, A-Z)
/// - Digits (0-9)
/// - Underscores (_)
///
/// Identifiers are always backtick-quoted when used, so reserved words are
/// allowed; this check only keeps quoting characters and separators out.
///
/// # Examples
///
/// ```
/// # use mysql_bigquery_replicator::utils::validate_identifier;
/// assert!(validate_identifier("batches").is_ok());
/// assert!(validate_identifier("user_events_2024").is_ok());
/// assert!(validate_identifier("users; DROP TABLE users;").is_err());
/// assert!(validate_identifier("users`--").is_err());
/// ```
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() {
        bail!("Identifier cannot be empty");
    }

    if identifier.len() > MAX_IDENTIFIER_LEN {
        bail!(
            "Identifier too long (max {} characters): {}",
            MAX_IDENTIFIER_LEN,
            identifier
        );
    }

    for ch in identifier.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '_' {
            bail!(
                "Invalid identifier '{}': contains invalid character '{}'. \
                Only alphanumeric characters and underscores are allowed.",
                identifier,
                ch
            );
        }
    }

    Ok(())
}

/// Validate a Google Cloud project ID
///
/// Project IDs are 6-30 characters of lowercase letters, digits and hyphens,
/// optionally prefixed by an organisation domain (`example.com:my-project`).
pub fn validate_project_id(project_id: &str) -> Result<()> {
    if project_id.is_empty() {
        bail!("Project ID cannot be empty");
    }

    let name = project_id
        .rsplit_once(':')
        .map_or(project_id, |(_, name)| name);

    if name.len() < 6 || name.len() > 30 {
        bail!(
            "Invalid project ID '{}': must be between 6 and 30 characters",
            project_id
        );
    }

    for ch in project_id.chars() {
        if !ch.is_ascii_lowercase() && !ch.is_ascii_digit() && !matches!(ch, '-' | '.' | ':') {
            bail!(
                "Invalid project ID '{}': contains invalid character '{}'",
                project_id,
                ch
            );
        }
    }

    Ok(())
}

/// Quote a MySQL identifier with backticks, doubling embedded backticks
pub fn quote_mysql_ident(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Retry a function with exponential backoff
///
/// Executes an async operation with automatic retry on failure. Each retry doubles
/// the delay (exponential backoff) to handle transient failures gracefully.
///
/// # Arguments
///
/// * `operation` - Async function to retry (FnMut returning Future\<Output = Result\<T\>\>)
/// * `max_retries` - Maximum number of retry attempts (0 = no retries, just initial attempt)
/// * `initial_delay` - Delay before first retry (doubles each subsequent retry)
///
/// # Examples
///
/// ```no_run
/// # use anyhow::Result;
/// # use std::time::Duration;
/// # use mysql_bigquery_replicator::utils::retry_with_backoff;
/// # async fn example() -> Result<()> {
/// let result = retry_with_backoff(
///     || async { Ok("success") },
///     3,  // Try up to 3 times
///     Duration::from_secs(1)  // Start with 1s delay
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt < max_retries {
                    tracing::warn!(
                        "Operation failed (attempt {}/{}), retrying in {:?}: {:#}",
                        attempt + 1,
                        max_retries + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("Operation failed after retries")))
}

/// Run a fallible future under an optional deadline
///
/// A timeout becomes an ordinary error naming `operation`, so callers handle it
/// exactly like a failed call. `None` waits indefinitely.
pub async fn with_timeout<T, Fut>(
    operation: &str,
    limit: Option<Duration>,
    future: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", operation, limit))?,
        None => future.await,
    }
}

/// Format a duration for log output (e.g. "4h 0m", "2m 5s", "850ms")
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", duration.as_millis())
    }
}
