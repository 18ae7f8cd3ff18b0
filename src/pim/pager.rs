//! Paged listings and name-keyed aggregation.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use tracing::warn;

use crate::error::PimError;

/// One page of an ARM list response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    pub next_link: Option<String>,
}

#[cfg(test)]
impl<T> Page<T> {
    pub fn last(value: Vec<T>) -> Self {
        Self {
            value,
            next_link: None,
        }
    }
}

pub type PageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<Page<T>, PimError>> + Send + 'a>>;

type FetchPage<'a, T> = Box<dyn FnMut(Option<String>) -> PageFuture<'a, T> + Send + 'a>;

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Lazy sequence of page batches following `nextLink`.
///
/// Finite and not restartable: after the last page or the first error it
/// yields nothing more.
pub struct Pager<'a, T> {
    fetch: FetchPage<'a, T>,
    cursor: Cursor,
}

impl<'a, T> Pager<'a, T> {
    /// `fetch` receives `None` for the first page and the previous
    /// `nextLink` afterwards.
    pub fn new(fetch: impl FnMut(Option<String>) -> PageFuture<'a, T> + Send + 'a) -> Self {
        Self {
            fetch: Box::new(fetch),
            cursor: Cursor::Start,
        }
    }

    pub async fn next_page(&mut self) -> Option<Result<Vec<T>, PimError>> {
        let link = match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Start => None,
            Cursor::Next(link) => Some(link),
            Cursor::Done => return None,
        };

        match (self.fetch)(link).await {
            Ok(page) => {
                if let Some(next) = page.next_link.filter(|l| !l.is_empty()) {
                    self.cursor = Cursor::Next(next);
                }
                Some(Ok(page.value))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Drain `pager` into `map`, keyed by the name `entry` extracts.
///
/// `entry` returns `Ok(None)` to skip an item and `Err` to stop. The first
/// occurrence of a name wins; later ones are logged and dropped. Returns the
/// number of dropped duplicates. On error `map` keeps what was collected.
pub async fn drain_by_name<T, V, F>(
    pager: &mut Pager<'_, T>,
    map: &mut HashMap<String, V>,
    kind: &str,
    mut entry: F,
) -> Result<usize, PimError>
where
    F: FnMut(T) -> Result<Option<(String, V)>, PimError>,
{
    let mut duplicates = 0;

    while let Some(page) = pager.next_page().await {
        for item in page? {
            let Some((name, value)) = entry(item)? else {
                continue;
            };

            match map.entry(name) {
                Entry::Occupied(existing) => {
                    warn!("duplicate {} ignored: {}", kind, existing.key());
                    duplicates += 1;
                }
                Entry::Vacant(slot) => {
                    slot.insert(value);
                }
            }
        }
    }

    Ok(duplicates)
}
