//! Double-pass template evaluation.
//!
//! A template is evaluated twice per scan. The discovery pass binds the
//! `service`, `key`, and `keyPrefix` helpers to accumulators that record
//! every referenced dependency and yield empty placeholders, so the
//! output is discarded but the reference list is exact. The render pass
//! binds the same helpers to lookups against a brain snapshot and
//! produces the real bytes.
//!
//! The engine never touches disk on the way out; rendered bytes go to
//! the caller.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use eyre::{Context as _, Result};
use handlebars::{Context, Handlebars, Helper, HelperDef, RenderContext, RenderError, ScopedJson};
use serde_json::{json, Value as Json};

use crate::brain::TemplateContext;
use crate::dependency::{Dependency, KeyDependency, KeyPrefixDependency, ServiceDependency};

/// How a render pass treats dependencies absent from the brain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPolicy {
    /// Absent values render as empty placeholders of the right shape, so
    /// iteration over them produces nothing.
    Lenient,
    /// Absent values fail the render.
    Strict,
}

/// Output of one render pass.
#[derive(Debug)]
pub struct RenderResult {
    /// Rendered bytes.
    pub output: Vec<u8>,
    /// Dependencies referenced during the render, in evaluation order.
    pub used: Vec<Dependency>,
    /// Referenced dependencies that had no value in the snapshot.
    pub missing: Vec<Dependency>,
}

/// A source template on disk.
///
/// Stateless: the file is re-read on every pass, so edits are picked up
/// by the next scan without any cache invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: PathBuf,
}

impl Template {
    /// Create a template backed by the given source file, validating
    /// that it exists and parses.
    pub fn new(source: impl Into<PathBuf>) -> Result<Self> {
        let source = source.into();
        let text = std::fs::read_to_string(&source)
            .wrap_err_with(|| format!("failed to read template {}", source.display()))?;
        handlebars::Template::compile(&text)
            .map_err(|e| eyre::eyre!("template {} failed to parse: {}", source.display(), e))?;
        Ok(Self { source })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Discovery pass: evaluate against empty placeholders and report
    /// every dependency the template references, duplicates preserved.
    pub fn dependencies(&self) -> Result<Vec<Dependency>> {
        let text = self.read()?;
        let found: DependencyLog = Arc::new(Mutex::new(Vec::new()));

        let mut registry = Handlebars::new();
        for kind in FnKind::ALL {
            registry.register_helper(
                kind.name(),
                Box::new(DiscoverFn {
                    kind,
                    found: Arc::clone(&found),
                }),
            );
        }

        registry
            .render_template(&text, &Json::Null)
            .wrap_err_with(|| format!("template {} failed to render", self.source.display()))?;

        let found = found.lock().unwrap().clone();
        Ok(found)
    }

    /// Render pass against a brain snapshot.
    pub fn render(&self, context: &Arc<TemplateContext>, policy: RenderPolicy) -> Result<RenderResult> {
        let text = self.read()?;
        let used: DependencyLog = Arc::new(Mutex::new(Vec::new()));
        let missing: DependencyLog = Arc::new(Mutex::new(Vec::new()));

        let mut registry = Handlebars::new();
        for kind in FnKind::ALL {
            registry.register_helper(
                kind.name(),
                Box::new(LookupFn {
                    kind,
                    context: Arc::clone(context),
                    policy,
                    used: Arc::clone(&used),
                    missing: Arc::clone(&missing),
                }),
            );
        }

        let output = registry
            .render_template(&text, &Json::Null)
            .wrap_err_with(|| format!("template {} failed to render", self.source.display()))?;

        let used = used.lock().unwrap().clone();
        let missing = missing.lock().unwrap().clone();
        Ok(RenderResult {
            output: output.into_bytes(),
            used,
            missing,
        })
    }

    fn read(&self) -> Result<String> {
        std::fs::read_to_string(&self.source)
            .wrap_err_with(|| format!("failed to read template {}", self.source.display()))
    }
}

type DependencyLog = Arc<Mutex<Vec<Dependency>>>;

#[derive(Debug, Clone, Copy)]
enum FnKind {
    Service,
    Key,
    KeyPrefix,
}

impl FnKind {
    const ALL: [FnKind; 3] = [FnKind::Service, FnKind::Key, FnKind::KeyPrefix];

    fn name(self) -> &'static str {
        match self {
            FnKind::Service => "service",
            FnKind::Key => "key",
            FnKind::KeyPrefix => "keyPrefix",
        }
    }

    /// The well-typed placeholder rendered when no value is available.
    fn empty_value(self) -> Json {
        match self {
            FnKind::Service | FnKind::KeyPrefix => json!([]),
            FnKind::Key => json!(""),
        }
    }
}

fn parse_argument(kind: FnKind, h: &Helper<'_, '_>) -> Result<Dependency, RenderError> {
    let spec = h
        .param(0)
        .and_then(|p| p.value().as_str())
        .ok_or_else(|| RenderError::new(format!("{} expects a single string argument", kind.name())))?;

    let dependency = match kind {
        FnKind::Service => {
            Dependency::Service(ServiceDependency::parse(spec).map_err(|e| RenderError::new(e.to_string()))?)
        }
        FnKind::Key => Dependency::Key(KeyDependency::parse(spec).map_err(|e| RenderError::new(e.to_string()))?),
        FnKind::KeyPrefix => {
            Dependency::KeyPrefix(KeyPrefixDependency::parse(spec).map_err(|e| RenderError::new(e.to_string()))?)
        }
    };
    Ok(dependency)
}

/// Helper that records the parsed dependency and yields an empty value.
struct DiscoverFn {
    kind: FnKind,
    found: DependencyLog,
}

impl HelperDef for DiscoverFn {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'reg, 'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'reg, 'rc>, RenderError> {
        let dependency = parse_argument(self.kind, h)?;
        self.found.lock().unwrap().push(dependency);
        Ok(ScopedJson::Derived(self.kind.empty_value()))
    }
}

/// Helper that resolves the parsed dependency against a brain snapshot.
struct LookupFn {
    kind: FnKind,
    context: Arc<TemplateContext>,
    policy: RenderPolicy,
    used: DependencyLog,
    missing: DependencyLog,
}

impl HelperDef for LookupFn {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'reg, 'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'reg, 'rc>, RenderError> {
        let dependency = parse_argument(self.kind, h)?;
        let fingerprint = dependency.fingerprint();
        self.used.lock().unwrap().push(dependency.clone());

        let value = match self.kind {
            FnKind::Service => self.context.services.get(&fingerprint).map(|v| json!(v)),
            FnKind::Key => self.context.keys.get(&fingerprint).map(|v| json!(v)),
            FnKind::KeyPrefix => self.context.key_prefixes.get(&fingerprint).map(|v| json!(v)),
        };

        match value {
            Some(value) => Ok(ScopedJson::Derived(value)),
            None => {
                self.missing.lock().unwrap().push(dependency.clone());
                match self.policy {
                    RenderPolicy::Lenient => Ok(ScopedJson::Derived(self.kind.empty_value())),
                    RenderPolicy::Strict => Err(RenderError::new(format!("no value for {dependency}"))),
                }
            }
        }
    }
}
