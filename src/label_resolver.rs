//! Sender → label resolution with on-demand creation and conflict fallback
use crate::client::GmailClient;
use crate::error::{GmailError, Result};
use crate::label_store::LabelStore;
use crate::models::SenderIdentity;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Counters for one run of the resolver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub cache_hits: usize,
    pub labels_created: usize,
    pub parents_created: usize,
    pub conflicts_resolved: usize,
    pub failures: usize,
}

/// What a dry run would do for a sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelPlan {
    /// The store already maps the sender to this label id
    Cached(String),
    /// A label with this name would be created or looked up
    Create(String),
}

/// Maps senders to label ids, creating `<parent>/<name>/<domain>` labels in
/// Gmail the first time a sender is seen.
///
/// The resolver owns the [`LabelStore`] for the duration of a run; cached
/// senders never cause a network call.
pub struct LabelResolver {
    client: Arc<dyn GmailClient>,
    store: LabelStore,
    parent_category: String,
    create_parent_labels: bool,
    parents_ensured: HashSet<String>,
    stats: ResolverStats,
}

impl LabelResolver {
    pub fn new(
        client: Arc<dyn GmailClient>,
        store: LabelStore,
        parent_category: impl Into<String>,
    ) -> Self {
        Self {
            client,
            store,
            parent_category: parent_category.into(),
            create_parent_labels: true,
            parents_ensured: HashSet::new(),
            stats: ResolverStats::default(),
        }
    }

    /// Whether intermediate hierarchy levels are created before a sender label
    pub fn with_parent_labels(mut self, enabled: bool) -> Self {
        self.create_parent_labels = enabled;
        self
    }

    /// Label id for `sender`, creating the label if needed.
    ///
    /// 1. Store hit: return the cached id.
    /// 2. Create `<parent>/<name>/<domain>`.
    /// 3. On a name conflict, look the existing label up by exact name.
    ///
    /// Any other failure is returned for this sender only; the store is left
    /// untouched so the sender is retried on the next run.
    pub async fn resolve(&mut self, sender: &SenderIdentity) -> Result<String> {
        if sender.is_unknown() {
            self.stats.failures += 1;
            return Err(GmailError::LabelError(
                "Message has no sender address".to_string(),
            ));
        }

        if let Some(id) = self.store.get(&sender.address) {
            self.stats.cache_hits += 1;
            return Ok(id.to_string());
        }

        let name = label_name(&self.parent_category, sender);
        if self.create_parent_labels {
            self.ensure_parent_labels(&name).await;
        }

        let result = match self.client.create_label(&name).await {
            Ok(id) => {
                info!("Created label '{}' with ID: {}", name, id);
                self.stats.labels_created += 1;
                Ok(id)
            }
            Err(e) if e.is_conflict() => {
                debug!("Label '{}' already exists, looking it up", name);
                self.find_existing(&name).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(id) => {
                self.store.put(sender.address.clone(), id.clone());
                Ok(id)
            }
            Err(e) => {
                self.stats.failures += 1;
                warn!("Could not resolve label for {}: {}", sender.address, e);
                Err(e)
            }
        }
    }

    /// Resolution outcome without any remote call, for dry runs
    pub fn planned_label(&self, sender: &SenderIdentity) -> Result<LabelPlan> {
        if sender.is_unknown() {
            return Err(GmailError::LabelError(
                "Message has no sender address".to_string(),
            ));
        }

        Ok(match self.store.get(&sender.address) {
            Some(id) => LabelPlan::Cached(id.to_string()),
            None => LabelPlan::Create(label_name(&self.parent_category, sender)),
        })
    }

    async fn find_existing(&mut self, name: &str) -> Result<String> {
        let labels = self.client.list_labels().await?;
        match labels.into_iter().find(|label| label.name == name) {
            Some(label) => {
                info!("Label '{}' already exists with ID: {}", name, label.id);
                self.stats.conflicts_resolved += 1;
                Ok(label.id)
            }
            None => Err(GmailError::LabelError(format!(
                "Label '{}' reported as existing but not found",
                name
            ))),
        }
    }

    /// Create each ancestor of `label_name` once per run.
    ///
    /// Failures here are logged only; the sender label itself is still
    /// attempted.
    async fn ensure_parent_labels(&mut self, label_name: &str) {
        let parts: Vec<&str> = label_name.split('/').collect();

        for i in 1..parts.len() {
            let parent_path = parts[..i].join("/");
            if !self.parents_ensured.insert(parent_path.clone()) {
                continue;
            }

            match self.client.create_label(&parent_path).await {
                Ok(id) => {
                    debug!("Created parent label '{}' with ID: {}", parent_path, id);
                    self.stats.parents_created += 1;
                }
                Err(e) if e.is_conflict() => {
                    debug!("Parent label '{}' already exists", parent_path);
                }
                Err(e) => {
                    warn!("Failed to create parent label '{}': {}", parent_path, e);
                }
            }
        }
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    pub fn store(&self) -> &LabelStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut LabelStore {
        &mut self.store
    }

    pub fn into_store(self) -> LabelStore {
        self.store
    }
}

/// Canonical label name: `<parent>/<display name or address>/<domain token>`
pub fn label_name(parent: &str, sender: &SenderIdentity) -> String {
    let display = sanitize(&sender.display_name);
    let component = if display.is_empty() {
        sanitize(&sender.address)
    } else {
        display
    };

    format!(
        "{}/{}/{}",
        parent,
        component,
        domain_component(&sender.address)
    )
}

/// First dot-delimited segment of the domain; `alice@mail.example.com` →
/// `mail`, `root@localhost` → `localhost`. An address without `@` is
/// returned whole. The segment may be empty (`odd@.com`).
pub fn domain_token(address: &str) -> &str {
    match address.split('@').nth(1) {
        Some(domain) => domain.split('.').next().unwrap_or(domain),
        None => address,
    }
}

/// Last label level: the sanitized domain token, else the sanitized
/// domain, else the sanitized address
fn domain_component(address: &str) -> String {
    let domain = address.split('@').nth(1).unwrap_or(address);

    [domain_token(address), domain, address]
        .into_iter()
        .map(sanitize)
        .find(|part| !part.is_empty())
        .unwrap_or_default()
}

/// Clean a label name component.
///
/// Angle brackets and surrounding quotes are header-encoding leftovers and
/// are dropped. `/` would add a hierarchy level, so it becomes `-`.
pub fn sanitize(component: &str) -> String {
    let stripped: String = component
        .chars()
        .filter(|c| !matches!(c, '<' | '>'))
        .map(|c| if c == '/' { '-' } else { c })
        .collect();

    let trimmed = stripped
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();

    WHITESPACE.replace_all(trimmed, " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::models::LabelInfo;
    use mockall::predicate::*;
    use proptest::prelude::*;

    fn resolver(client: MockClient) -> LabelResolver {
        LabelResolver::new(
            Arc::new(client),
            LabelStore::empty("label_dict.json"),
            "Subscriptions",
        )
        .with_parent_labels(false)
    }

    fn alice() -> SenderIdentity {
        SenderIdentity::new("alice@example.com", "Alice")
    }

    #[test]
    fn test_label_name_with_display_name() {
        assert_eq!(
            label_name("Subscriptions", &alice()),
            "Subscriptions/Alice/example"
        );
    }

    #[test]
    fn test_label_name_without_display_name() {
        let bob = SenderIdentity::new("bob@sub.example.org", "");
        assert_eq!(
            label_name("Subscriptions", &bob),
            "Subscriptions/bob@sub.example.org/sub"
        );

        let classified =
            crate::classifier::classify(&[crate::models::MessageHeader::new(
                "From",
                "bob@sub.example.org",
            )]);
        assert_eq!(
            label_name("Subscriptions", &classified),
            "Subscriptions/bob@sub.example.org/sub"
        );
    }

    #[test]
    fn test_label_name_strips_encoding_artifacts() {
        let sender = SenderIdentity::new("news@letters.io", " \"<The>  News / Daily\" ");
        assert_eq!(
            label_name("Subscriptions", &sender),
            "Subscriptions/The News - Daily/letters"
        );
    }

    #[test]
    fn test_domain_token_degrades() {
        assert_eq!(domain_token("alice@example.com"), "example");
        assert_eq!(domain_token("alice@mail.example.com"), "mail");
        assert_eq!(domain_token("localpart"), "localpart");
        assert_eq!(domain_token("root@localhost"), "localhost");
        assert_eq!(domain_token("odd@.com"), "");
    }

    #[test]
    fn test_label_name_dotless_domain() {
        let root = SenderIdentity::new("root@localhost", "Root");
        assert_eq!(label_name("Subscriptions", &root), "Subscriptions/Root/localhost");
    }

    #[test]
    fn test_label_name_never_ends_with_empty_level() {
        let bracketed = SenderIdentity::new("x@<.com", "");
        assert_eq!(
            label_name("Subscriptions", &bracketed),
            "Subscriptions/x@.com/.com"
        );

        let leading_dot = SenderIdentity::new("odd@.com", "Odd");
        assert_eq!(
            label_name("Subscriptions", &leading_dot),
            "Subscriptions/Odd/.com"
        );

        let no_domain = SenderIdentity::new("x@", "X");
        assert_eq!(label_name("Subscriptions", &no_domain), "Subscriptions/X/x@");
    }

    #[tokio::test]
    async fn test_resolve_creates_then_caches() {
        let mut mock_client = MockClient::new();
        mock_client
            .expect_create_label()
            .with(eq("Subscriptions/Alice/example"))
            .times(1)
            .returning(|_| Ok("Label_1".to_string()));
        mock_client.expect_list_labels().times(0);

        let mut resolver = resolver(mock_client);

        let first = resolver.resolve(&alice()).await.unwrap();
        let second = resolver.resolve(&alice()).await.unwrap();

        assert_eq!(first, "Label_1");
        assert_eq!(second, "Label_1");
        assert_eq!(resolver.store().get("alice@example.com"), Some("Label_1"));

        let stats = resolver.stats();
        assert_eq!(stats.labels_created, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_resolve_store_hit_makes_no_calls() {
        let mut mock_client = MockClient::new();
        mock_client.expect_create_label().times(0);
        mock_client.expect_list_labels().times(0);

        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut store = LabelStore::empty(temp_dir.path().join("label_dict.json"));
        store.put("alice@example.com", "Label_cached");
        store.persist().await.unwrap();
        assert!(!store.is_dirty());

        let mut resolver =
            LabelResolver::new(Arc::new(mock_client), store, "Subscriptions");

        assert_eq!(resolver.resolve(&alice()).await.unwrap(), "Label_cached");
        assert!(!resolver.store().is_dirty());
        assert_eq!(resolver.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_resolve_conflict_falls_back_to_lookup() {
        let mut mock_client = MockClient::new();
        mock_client
            .expect_create_label()
            .with(eq("Subscriptions/Alice/example"))
            .times(1)
            .returning(|_| Err(GmailError::Conflict("Label name exists".to_string())));
        mock_client.expect_list_labels().times(1).returning(|| {
            Ok(vec![
                LabelInfo {
                    id: "Label_other".to_string(),
                    name: "Subscriptions/Alice".to_string(),
                },
                LabelInfo {
                    id: "Label_existing".to_string(),
                    name: "Subscriptions/Alice/example".to_string(),
                },
            ])
        });

        let mut resolver = resolver(mock_client);

        assert_eq!(resolver.resolve(&alice()).await.unwrap(), "Label_existing");
        assert_eq!(
            resolver.store().get("alice@example.com"),
            Some("Label_existing")
        );
        assert_eq!(resolver.stats().conflicts_resolved, 1);
        assert_eq!(resolver.stats().labels_created, 0);
    }

    #[tokio::test]
    async fn test_resolve_conflict_without_match_fails() {
        let mut mock_client = MockClient::new();
        mock_client
            .expect_create_label()
            .returning(|_| Err(GmailError::Conflict("exists".to_string())));
        mock_client.expect_list_labels().returning(|| {
            Ok(vec![LabelInfo {
                id: "Label_x".to_string(),
                name: "subscriptions/alice/example".to_string(),
            }])
        });

        let mut resolver = resolver(mock_client);

        let result = resolver.resolve(&alice()).await;
        assert!(matches!(result, Err(GmailError::LabelError(_))));
        assert!(resolver.store().is_empty());
        assert_eq!(resolver.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_resolve_other_error_leaves_store_untouched() {
        let mut mock_client = MockClient::new();
        mock_client.expect_create_label().times(2).returning(|_| {
            Err(GmailError::ServerError {
                status: 503,
                message: "unavailable".to_string(),
            })
        });
        mock_client.expect_list_labels().times(0);

        let mut resolver = resolver(mock_client);

        assert!(resolver.resolve(&alice()).await.is_err());
        // not cached, so the next attempt goes remote again
        assert!(resolver.resolve(&alice()).await.is_err());
        assert!(resolver.store().is_empty());
        assert!(!resolver.store().is_dirty());
        assert_eq!(resolver.stats().failures, 2);
    }

    #[tokio::test]
    async fn test_resolve_unknown_sender_is_label_error() {
        let mut mock_client = MockClient::new();
        mock_client.expect_create_label().times(0);

        let mut resolver = resolver(mock_client);

        let result = resolver.resolve(&SenderIdentity::unknown()).await;
        assert!(matches!(result, Err(GmailError::LabelError(_))));
    }

    #[tokio::test]
    async fn test_parent_labels_created_once_per_run() {
        let mut mock_client = MockClient::new();
        mock_client
            .expect_create_label()
            .with(eq("Subscriptions"))
            .times(1)
            .returning(|_| Err(GmailError::Conflict("exists".to_string())));
        mock_client
            .expect_create_label()
            .with(eq("Subscriptions/Alice"))
            .times(1)
            .returning(|_| Ok("Label_parent".to_string()));
        mock_client
            .expect_create_label()
            .with(eq("Subscriptions/Alice/example"))
            .times(1)
            .returning(|_| Ok("Label_1".to_string()));
        mock_client
            .expect_create_label()
            .with(eq("Subscriptions/Alice/corp"))
            .times(1)
            .returning(|_| Ok("Label_2".to_string()));

        let mut resolver = LabelResolver::new(
            Arc::new(mock_client),
            LabelStore::empty("label_dict.json"),
            "Subscriptions",
        );

        let home = resolver.resolve(&alice()).await.unwrap();
        let work = resolver
            .resolve(&SenderIdentity::new("alice@corp.net", "Alice"))
            .await
            .unwrap();

        assert_eq!(home, "Label_1");
        assert_eq!(work, "Label_2");
        assert_eq!(resolver.stats().parents_created, 1);
        assert_eq!(resolver.stats().labels_created, 2);
    }

    #[tokio::test]
    async fn test_parent_label_failure_does_not_block_sender_label() {
        let mut mock_client = MockClient::new();
        mock_client
            .expect_create_label()
            .with(eq("Subscriptions"))
            .returning(|_| Err(GmailError::Forbidden("nope".to_string())));
        mock_client
            .expect_create_label()
            .with(eq("Subscriptions/Alice"))
            .returning(|_| Err(GmailError::Forbidden("nope".to_string())));
        mock_client
            .expect_create_label()
            .with(eq("Subscriptions/Alice/example"))
            .returning(|_| Ok("Label_1".to_string()));

        let mut resolver = LabelResolver::new(
            Arc::new(mock_client),
            LabelStore::empty("label_dict.json"),
            "Subscriptions",
        );

        assert_eq!(resolver.resolve(&alice()).await.unwrap(), "Label_1");
    }

    #[test]
    fn test_planned_label() {
        let mut store = LabelStore::empty("label_dict.json");
        store.put("alice@example.com", "Label_1");
        let resolver = LabelResolver::new(
            Arc::new(MockClient::new()),
            store,
            "Subscriptions",
        );

        assert_eq!(
            resolver.planned_label(&alice()).unwrap(),
            LabelPlan::Cached("Label_1".to_string())
        );
        assert_eq!(
            resolver
                .planned_label(&SenderIdentity::new("bob@sub.example.org", ""))
                .unwrap(),
            LabelPlan::Create("Subscriptions/bob@sub.example.org/sub".to_string())
        );
        assert!(resolver.planned_label(&SenderIdentity::unknown()).is_err());
    }

    proptest! {
        #[test]
        fn prop_label_name_has_three_levels(
            local in "[a-z0-9./<>\" ]{0,12}",
            domain in "[a-z0-9./<> ]{0,16}",
            display in ".{0,24}",
        ) {
            let sender = SenderIdentity::new(format!("{}@{}", local, domain), display);
            let name = label_name("Subscriptions", &sender);
            prop_assert!(name.starts_with("Subscriptions/"));
            prop_assert_eq!(name.split('/').count(), 3);
            prop_assert!(name.split('/').all(|level| !level.is_empty()));
        }

        #[test]
        fn prop_domain_token_never_panics(address in ".{0,40}") {
            let token = domain_token(&address);
            prop_assert!(address.contains(token));
        }

        #[test]
        fn prop_sanitize_removes_hierarchy_and_brackets(raw in ".{0,40}") {
            let cleaned = sanitize(&raw);
            prop_assert!(!cleaned.contains('/'));
            prop_assert!(!cleaned.contains('<'));
            prop_assert!(!cleaned.contains('>'));
            prop_assert_eq!(cleaned.trim(), cleaned.as_str());
        }
    }
}
