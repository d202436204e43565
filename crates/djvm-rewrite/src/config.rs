//! The hierarchical sandbox configuration.
//!
//! A configuration is constructed once per sandbox root and never mutates.
//! Children inherit the rewrite pipeline (rules, providers, emitters,
//! catalog), add a local user source, and chain a fresh local cache under
//! the parent's; they are discarded after use.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use djvm_config::{ExecutionProfile, Settings};
use djvm_error::Severity;

use crate::analysis::AnalysisConfiguration;
use crate::audit::{AuditLogger, NoopAuditLogger};
use crate::cache::{ByteCodeCache, ExternalCache};
use crate::emitters::{standard_emitters, Emitter};
use crate::policy::RuleCatalog;
use crate::providers::{standard_providers, DefinitionProvider};
use crate::resolver::ClassResolver;
use crate::rules::{standard_rules, Rule};
use crate::source::{SourceClassLoader, SourceError};
use crate::whitelist::Whitelist;

/// The rewrite pipeline, shared between a configuration and its children.
struct Pipeline {
    catalog: RuleCatalog,
    rules: Vec<Box<dyn Rule>>,
    providers: Vec<Box<dyn DefinitionProvider>>,
    emitters: Vec<Box<dyn Emitter>>,
}

/// Everything one sandbox root needs to rewrite classes.
pub struct SandboxConfiguration {
    pipeline: Arc<Pipeline>,
    resolver: Arc<ClassResolver>,
    whitelist: Arc<Whitelist>,
    analysis: AnalysisConfiguration,
    profile: Option<ExecutionProfile>,
    source: Arc<SourceClassLoader>,
    cache: Arc<ByteCodeCache>,
    external: Option<Arc<dyn ExternalCache>>,
    audit: Arc<dyn AuditLogger>,
    parent: Option<Arc<SandboxConfiguration>>,
}

impl SandboxConfiguration {
    /// Start building a root configuration.
    pub fn builder() -> SandboxConfigurationBuilder {
        SandboxConfigurationBuilder::default()
    }

    /// Build a root configuration from file-loaded settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, SourceError> {
        let mut builder = Self::builder()
            .user_source(settings.rewriter.user_sources.clone())
            .minimum_severity(settings.rewriter.minimum_severity)
            .visible_annotations(settings.rewriter.visible_annotations.iter().cloned())
            .pinned_classes(settings.rewriter.pinned_classes.iter().cloned());
        if let Some(bootstrap) = &settings.rewriter.bootstrap_source {
            builder = builder.bootstrap_source(bootstrap.clone());
        }
        if let Some(profile) = settings.profile {
            builder = builder.execution_profile(profile);
        }
        builder.build()
    }

    /// Spawn a child configuration for an independent tenant: same
    /// pipeline, a local user source searched after this configuration's
    /// sources, and a fresh cache chained under this configuration's.
    pub fn create_child(self: &Arc<Self>, user_source: &[PathBuf]) -> Result<Arc<Self>, SourceError> {
        let source = Arc::new(SourceClassLoader::with_parent(
            Some(Arc::clone(&self.source)),
            user_source,
        )?);
        Ok(Arc::new(Self {
            pipeline: Arc::clone(&self.pipeline),
            resolver: Arc::clone(&self.resolver),
            whitelist: Arc::clone(&self.whitelist),
            analysis: self.analysis.clone(),
            profile: self.profile,
            source,
            cache: ByteCodeCache::child_of(Arc::clone(&self.cache)),
            external: self.external.clone(),
            audit: Arc::clone(&self.audit),
            parent: Some(Arc::clone(self)),
        }))
    }

    /// The namespace resolver.
    pub fn resolver(&self) -> &ClassResolver {
        &self.resolver
    }

    /// The whitelist.
    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// The member rule catalog.
    pub fn catalog(&self) -> &RuleCatalog {
        &self.pipeline.catalog
    }

    /// The validation rules, in application order.
    pub fn rules(&self) -> &[Box<dyn Rule>] {
        &self.pipeline.rules
    }

    /// The definition providers, in application order.
    pub fn providers(&self) -> &[Box<dyn DefinitionProvider>] {
        &self.pipeline.providers
    }

    /// The emitters, in priority order.
    pub fn emitters(&self) -> &[Box<dyn Emitter>] {
        &self.pipeline.emitters
    }

    /// Analysis thresholds and pass-through sets.
    pub fn analysis_configuration(&self) -> &AnalysisConfiguration {
        &self.analysis
    }

    /// The execution profile, when configured.
    pub fn execution_profile(&self) -> Option<&ExecutionProfile> {
        self.profile.as_ref()
    }

    /// The class byte source.
    pub fn source(&self) -> &Arc<SourceClassLoader> {
        &self.source
    }

    /// This configuration's cache chain.
    pub fn cache(&self) -> &Arc<ByteCodeCache> {
        &self.cache
    }

    /// The shared external cache, when configured.
    pub fn external_cache(&self) -> Option<&Arc<dyn ExternalCache>> {
        self.external.as_ref()
    }

    /// The audit sink.
    pub fn audit_logger(&self) -> &Arc<dyn AuditLogger> {
        &self.audit
    }

    /// The parent configuration, when this is a child.
    pub fn parent(&self) -> Option<&Arc<SandboxConfiguration>> {
        self.parent.as_ref()
    }
}

impl std::fmt::Debug for SandboxConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxConfiguration")
            .field("analysis", &self.analysis)
            .field("profile", &self.profile)
            .field("source", &self.source)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Named inputs for a root [`SandboxConfiguration`].
#[derive(Default)]
pub struct SandboxConfigurationBuilder {
    user_source: Vec<PathBuf>,
    bootstrap_source: Option<PathBuf>,
    whitelist: Option<Whitelist>,
    pinned_classes: Vec<String>,
    execution_profile: Option<ExecutionProfile>,
    external_cache: Option<Arc<dyn ExternalCache>>,
    minimum_severity: Option<Severity>,
    visible_annotations: HashSet<String>,
    audit_logger: Option<Arc<dyn AuditLogger>>,
    catalog: Option<RuleCatalog>,
}

impl SandboxConfigurationBuilder {
    /// Archives and directories searched for user classes, in order.
    pub fn user_source(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.user_source.extend(paths);
        self
    }

    /// The archive holding the deterministic runtime's own classes. It is
    /// searched before the user sources.
    pub fn bootstrap_source(mut self, path: PathBuf) -> Self {
        self.bootstrap_source = Some(path);
        self
    }

    /// Replace the default minimal whitelist.
    pub fn whitelist(mut self, whitelist: Whitelist) -> Self {
        self.whitelist = Some(whitelist);
        self
    }

    /// Additional names pinned to the host namespace.
    pub fn pinned_classes(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.pinned_classes.extend(names);
        self
    }

    /// Enable instrumentation under the given budgets.
    pub fn execution_profile(mut self, profile: ExecutionProfile) -> Self {
        self.execution_profile = Some(profile);
        self
    }

    /// Attach a shared external cache.
    pub fn external_cache(mut self, cache: Arc<dyn ExternalCache>) -> Self {
        self.external_cache = Some(cache);
        self
    }

    /// Diagnostics below this severity are dropped from aggregation.
    pub fn minimum_severity(mut self, severity: Severity) -> Self {
        self.minimum_severity = Some(severity);
        self
    }

    /// Annotation type descriptors passed through the rewrite unchanged.
    pub fn visible_annotations(mut self, descriptors: impl IntoIterator<Item = String>) -> Self {
        self.visible_annotations.extend(descriptors);
        self
    }

    /// Attach an audit sink.
    pub fn audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit_logger = Some(logger);
        self
    }

    /// Replace the standard member rule catalog.
    pub fn rule_catalog(mut self, catalog: RuleCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Assemble the root configuration, opening every source path.
    pub fn build(self) -> Result<SandboxConfiguration, SourceError> {
        let whitelist = Arc::new(self.whitelist.unwrap_or_else(Whitelist::minimal));
        let resolver = Arc::new(ClassResolver::new(Arc::clone(&whitelist), self.pinned_classes));

        let mut paths = Vec::new();
        if let Some(bootstrap) = self.bootstrap_source {
            paths.push(bootstrap);
        }
        paths.extend(self.user_source);
        let source = Arc::new(SourceClassLoader::from_paths(&paths)?);

        let analysis = AnalysisConfiguration {
            minimum_severity: self.minimum_severity.unwrap_or(Severity::Warning),
            visible_annotations: self.visible_annotations,
            ..AnalysisConfiguration::default()
        };

        let pipeline = Pipeline {
            catalog: self.catalog.unwrap_or_default(),
            rules: standard_rules(),
            providers: standard_providers(),
            emitters: standard_emitters(self.execution_profile.is_some()),
        };

        Ok(SandboxConfiguration {
            pipeline: Arc::new(pipeline),
            resolver,
            whitelist,
            analysis,
            profile: self.execution_profile,
            source,
            cache: ByteCodeCache::root(),
            external: self.external_cache,
            audit: self
                .audit_logger
                .unwrap_or_else(|| Arc::new(NoopAuditLogger)),
            parent: None,
        })
    }
}
