use std::sync::Arc;

use agri_chat_client::{ChatBackend, ClientResult, ConversationId, ConversationSummary};
use arc_swap::ArcSwap;

/// Cached conversation listing for the sidebar.
///
/// The snapshot is only ever replaced as a whole, so readers never observe a
/// partially refreshed list.
pub struct ConversationDirectory {
    backend: Arc<dyn ChatBackend>,
    snapshot: ArcSwap<Vec<ConversationSummary>>,
}

impl ConversationDirectory {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            snapshot: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Replaces the snapshot from the listing endpoint.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> ClientResult<usize> {
        let summaries = self
            .backend
            .list_conversations()
            .await?
            .into_iter()
            .map(ConversationSummary::normalized)
            .collect::<Vec<_>>();

        let count = summaries.len();
        self.snapshot.store(Arc::new(summaries));
        tracing::debug!(count, "conversation directory refreshed");
        Ok(count)
    }

    pub fn list(&self) -> Arc<Vec<ConversationSummary>> {
        self.snapshot.load_full()
    }

    pub fn find(&self, id: &ConversationId) -> Option<ConversationSummary> {
        self.snapshot
            .load()
            .iter()
            .find(|summary| summary.id == *id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use agri_chat_client::{
        BoxFuture, ChatRequest, ChatStream, ClientError, DEFAULT_CONVERSATION_TITLE, HistoryTurn,
    };

    use super::*;

    struct ListingBackend {
        responses: Mutex<Vec<ClientResult<Vec<ConversationSummary>>>>,
    }

    impl ChatBackend for ListingBackend {
        fn open_chat<'a>(&'a self, _request: ChatRequest) -> BoxFuture<'a, ClientResult<ChatStream>> {
            Box::pin(async {
                Err(ClientError::UnexpectedStatus {
                    stage: "test",
                    endpoint: "chat/stream".to_string(),
                    status: 501,
                    body: String::new(),
                })
            })
        }

        fn load_history<'a>(
            &'a self,
            _conversation_id: &'a ConversationId,
        ) -> BoxFuture<'a, ClientResult<Vec<HistoryTurn>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn list_conversations<'a>(
            &'a self,
        ) -> BoxFuture<'a, ClientResult<Vec<ConversationSummary>>> {
            let response = self.responses.lock().unwrap().remove(0);
            Box::pin(async move { response })
        }
    }

    #[tokio::test]
    async fn refresh_replaces_wholesale_and_keeps_snapshot_on_failure() {
        let backend = ListingBackend {
            responses: Mutex::new(vec![
                Ok(vec![
                    ConversationSummary::new("1", "Wheat rust"),
                    ConversationSummary::new("2", "  "),
                ]),
                Err(ClientError::UnexpectedStatus {
                    stage: "test",
                    endpoint: "chats".to_string(),
                    status: 500,
                    body: String::new(),
                }),
                Ok(vec![ConversationSummary::new("3", "Cotton")]),
            ]),
        };
        let directory = ConversationDirectory::new(Arc::new(backend));

        assert_eq!(directory.refresh().await.unwrap(), 2);
        let first = directory.list();
        assert_eq!(
            directory.find(&ConversationId::from("2")).unwrap().display_name,
            DEFAULT_CONVERSATION_TITLE
        );

        assert!(directory.refresh().await.is_err());
        assert_eq!(directory.list(), first);

        directory.refresh().await.unwrap();
        assert_eq!(*directory.list(), vec![ConversationSummary::new("3", "Cotton")]);
        // Snapshots handed out earlier are unaffected by the swap.
        assert_eq!(first.len(), 2);
    }
}
