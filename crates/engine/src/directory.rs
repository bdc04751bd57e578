use std::cmp::Ordering;
use std::sync::Arc;

use palaver_storage::{ContactRecord, DirectoryStore, UserId};
use snafu::ResultExt;

use crate::error::{DirectorySearchFailedSnafu, EngineResult};

/// Ranked search result page plus the full match count, so a caller can
/// offer "show more" by re-running the same query with a larger limit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchOutcome {
    pub results: Vec<ContactRecord>,
    pub total_matches: usize,
}

impl SearchOutcome {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Search over the user directory. The collaborator only supports full-set
/// retrieval; filtering, ranking, and pagination happen here.
pub struct DirectoryIndex {
    store: Arc<dyn DirectoryStore>,
}

impl DirectoryIndex {
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self { store }
    }

    /// Two-field structured prefix match: the first query token must prefix
    /// the candidate's first name and the second, when present, must prefix
    /// the surname. The caller is always excluded from the results.
    pub async fn search(
        &self,
        query: &str,
        exclude: &UserId,
        limit: usize,
    ) -> EngineResult<SearchOutcome> {
        let tokens = query_tokens(query);
        // A cleared input never scans the full directory.
        if tokens.is_empty() {
            return Ok(SearchOutcome::empty());
        }

        let contacts = self
            .store
            .list_contacts()
            .await
            .context(DirectorySearchFailedSnafu {
                stage: "directory-search-list",
            })?;

        let mut matches: Vec<ContactRecord> = contacts
            .into_iter()
            .filter(|contact| &contact.id != exclude && matches_tokens(contact, &tokens))
            .collect();
        matches.sort_by(compare_for_ranking);

        let total_matches = matches.len();
        matches.truncate(limit);

        Ok(SearchOutcome {
            results: matches,
            total_matches,
        })
    }

    /// Insert-if-absent sync of a directory record, used for the signed-in
    /// user's own profile on session open.
    pub async fn sync_contact(&self, record: ContactRecord) -> EngineResult<()> {
        self.store
            .ensure_contact(record)
            .await
            .context(DirectorySearchFailedSnafu {
                stage: "directory-sync-contact",
            })
    }
}

fn query_tokens(query: &str) -> Vec<String> {
    query
        .trim()
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn matches_tokens(contact: &ContactRecord, tokens: &[String]) -> bool {
    match tokens {
        [first] => contact.name.to_lowercase().starts_with(first),
        [first, second] => {
            contact.name.to_lowercase().starts_with(first)
                && contact.surname.to_lowercase().starts_with(second)
        }
        // A third token has no field left to constrain.
        _ => false,
    }
}

fn compare_for_ranking(left: &ContactRecord, right: &ContactRecord) -> Ordering {
    left.display_name()
        .to_lowercase()
        .cmp(&right.display_name().to_lowercase())
        .then_with(|| left.id.cmp(&right.id))
}
