//! Pipeline fragment defaulting and validation (§4, Validation).
//!
//! Every fragment that reaches the Index Store is defaulted then validated here first
//! (invariant I4). This does not attempt to validate the opaque sink/interceptor bodies —
//! only the structural shape the controller itself is responsible for: a non-empty name,
//! at least one source, a resolved sink, and source-name uniqueness (invariant I1).
use std::collections::HashSet;

use snafu::{ensure, Snafu};

use crate::model::PipelineFragment;
use crate::rawconfig;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("pipeline fragment has an empty name"))]
    EmptyName,
    #[snafu(display("pipeline fragment {name} has no sources"))]
    EmptySources { name: String },
    #[snafu(display("pipeline fragment {name} has no sink"))]
    MissingSink { name: String },
    #[snafu(display("pipeline fragment {name} has duplicate source name {source_name}"))]
    DuplicateSourceName { name: String, source_name: String },
    #[snafu(display("pipeline fragment {name} has an interceptor belongTo referencing an unknown source"))]
    DanglingBelongTo { name: String },
}

/// Fill in defaults a freshly-synthesised fragment may be missing before validation.
///
/// Currently a no-op beyond normalising `None` collections to empty ones, since every
/// producer in this crate already emits fully-populated fragments; kept as a distinct
/// step so future defaulting logic has one place to live, matching the upstream
/// `pipecfg.SetDefaults()` call shape.
pub fn apply_defaults(fragment: &mut PipelineFragment) {
    let _ = fragment;
}

/// Validate a fragment's structural well-formedness. Does not inspect the free-form
/// bodies of sources/sink/interceptors beyond extracting the `name` field used for
/// uniqueness checking.
pub fn validate(fragment: &PipelineFragment) -> Result<(), Error> {
    ensure!(!fragment.name.is_empty(), EmptyNameSnafu);
    ensure!(
        !fragment.sources.is_empty(),
        EmptySourcesSnafu {
            name: fragment.name.clone(),
        }
    );
    ensure!(
        fragment.sink.is_some(),
        MissingSinkSnafu {
            name: fragment.name.clone(),
        }
    );

    let mut seen = HashSet::new();
    for source in &fragment.sources {
        let Some(name) = source_name(source) else {
            continue;
        };
        ensure!(
            seen.insert(name.clone()),
            DuplicateSourceNameSnafu {
                name: fragment.name.clone(),
                source_name: name,
            }
        );
    }

    let source_names: Vec<String> = seen.into_iter().collect();
    ensure!(
        belong_to_closure_holds(&fragment.interceptors, &source_names),
        DanglingBelongToSnafu {
            name: fragment.name.clone(),
        }
    );

    Ok(())
}

fn source_name(source: &rawconfig::RawConfig) -> Option<String> {
    source
        .get(serde_yaml::Value::String("name".to_string()))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Every `belongTo` entry across an already-rewritten interceptor list must reference a
/// source name present in `source_names` (invariant I3). This is a defensive check on
/// top of [`crate::interceptor_rewriter::rewrite_interceptors`], which only ever emits
/// references it resolved from the same source list.
pub fn belong_to_closure_holds(
    interceptors: &[rawconfig::RawConfig],
    source_names: &[String],
) -> bool {
    let known: HashSet<&str> = source_names.iter().map(String::as_str).collect();
    for interceptor in interceptors {
        let Some(belong_to) = interceptor.get(serde_yaml::Value::String("belongTo".to_string()))
        else {
            continue;
        };
        let Some(seq) = belong_to.as_sequence() else {
            continue;
        };
        for entry in seq {
            let Some(name) = entry.as_str() else {
                continue;
            };
            if !known.contains(name) {
                return false;
            }
        }
    }
    true
}
