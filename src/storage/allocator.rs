//! Best-effort random identifier allocation.
//!
//! There is no central index to consult: the namespace is a flat directory,
//! so the allocator draws random names and retries past occupied ones.
//! Collision probability is controlled purely by the configured identifier
//! length; the attempt budget only bounds retry cost under a pathological
//! configuration (very short identifiers at high volume).

use std::future::Future;

use rand::distr::Alphanumeric;
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AllocateError<E> {
    /// Every draw within the budget was occupied. A configuration problem,
    /// not a transient one.
    #[error("identifier collision retry budget exhausted")]
    Exhausted,

    /// The occupancy check itself failed.
    #[error("identifier occupancy check failed")]
    Check(#[source] E),
}

/// Draw a uniformly random alphanumeric string. Also used for the
/// per-upload encryption secret.
pub fn random_alphanumeric(length: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Allocate an unoccupied identifier of `length` characters.
///
/// `occupied` is supplied by the storage layer and may claim the name as a
/// side effect (exclusive create); reporting an already-claimed name as
/// occupied makes a lost race to a concurrent uploader just another
/// collision, retried against the same budget. Fails with
/// [`AllocateError::Exhausted`] after `max_attempts` occupied draws.
pub async fn allocate<F, Fut, E>(
    length: usize,
    max_attempts: u32,
    mut occupied: F,
) -> Result<String, AllocateError<E>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::error::Error + 'static,
{
    let mut attempts = 0;
    loop {
        let candidate = random_alphanumeric(length);
        if !occupied(candidate.clone())
            .await
            .map_err(AllocateError::Check)?
        {
            return Ok(candidate);
        }
        attempts += 1;
        if attempts >= max_attempts {
            return Err(AllocateError::Exhausted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn identifiers_are_alphanumeric_at_the_requested_length() {
        for length in [1usize, 5, 32] {
            let id = random_alphanumeric(length);
            assert_eq!(id.len(), length);
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[tokio::test]
    async fn never_returns_an_occupied_identifier() {
        let taken: HashSet<String> = ["aa", "bb", "cc"].iter().map(|s| s.to_string()).collect();
        let id = allocate(2, 100, |candidate| {
            let hit = taken.contains(&candidate);
            async move { Ok::<_, Infallible>(hit) }
        })
        .await
        .unwrap();
        assert!(!taken.contains(&id));
    }

    #[tokio::test]
    async fn exhausts_after_exactly_max_attempts_draws() {
        let draws = AtomicU32::new(0);
        let result = allocate(5, 3, |_| {
            draws.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Infallible>(true) }
        })
        .await;

        assert!(matches!(result, Err(AllocateError::Exhausted)));
        assert_eq!(draws.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn check_errors_propagate() {
        let result = allocate(5, 3, |_| async {
            Err::<bool, _>(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
        })
        .await;

        assert!(matches!(result, Err(AllocateError::Check(_))));
    }
}
