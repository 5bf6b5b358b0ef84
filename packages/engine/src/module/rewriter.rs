// packages/engine/src/module/rewriter.rs
//! Call-site interposition
//!
//! Every `Invoke` whose (owner, name, signature, kind) matches a rule is
//! replaced by a static call to the rule's target. The target `Method`
//! entry is interned at the end of the pool and the two invoke forms share
//! an encoded width, so nothing else in the image moves.

use crate::interception::registry::RuleSet;
use crate::interception::rule::{InterpositionRule, RuleError};
use crate::interception::symbol::{CallKind, DescriptorError, Symbol};
use crate::module::constant_pool::{ConstantPool, PoolOverflow};
use crate::module::instruction::{offsets, Instruction};
use crate::module::ModuleImage;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    #[error("method {method} @{offset}: invoke operand #{index} is not a method reference")]
    BadOperand {
        method: String,
        offset: u32,
        index: u16,
    },

    #[error("call site #{index} has a malformed descriptor")]
    Descriptor {
        index: u16,
        #[source]
        error: DescriptorError,
    },

    #[error("rule cannot be applied")]
    IllegalRule(#[from] RuleError),

    #[error(transparent)]
    Pool(#[from] PoolOverflow),
}

/// One rewritten call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenSite {
    pub method: String,
    pub offset: u32,
    pub from: Symbol,
    pub to: Symbol,
}

/// What a rewrite changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    pub module: String,
    pub sites: Vec<RewrittenSite>,
    /// Pool entries appended for rule targets
    pub pool_growth: usize,
}

impl RewriteReport {
    pub fn call_sites(&self) -> usize {
        self.sites.len()
    }

    pub fn is_unchanged(&self) -> bool {
        self.sites.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Replacement {
    index: u16,
    from: Symbol,
    to: Symbol,
}

pub struct Rewriter<'a> {
    rules: &'a RuleSet,
}

impl<'a> Rewriter<'a> {
    pub fn new(rules: &'a RuleSet) -> Self {
        Self { rules }
    }

    /// Rewrite matching call sites in place
    pub fn rewrite(&self, image: &mut ModuleImage) -> Result<RewriteReport, RewriteError> {
        let mut report = RewriteReport {
            module: image.name().unwrap_or_default().to_string(),
            ..Default::default()
        };
        if self.rules.is_empty() {
            return Ok(report);
        }

        let labels: Vec<String> = (0..image.methods.len())
            .map(|index| image.describe_method(index))
            .collect();
        let pool_before = image.pool.len();

        let ModuleImage { pool, methods, .. } = image;
        // Keyed by operand and kind: the same entry can be invoked both ways.
        let mut cache: HashMap<(u16, CallKind), Option<Replacement>> = HashMap::new();

        for (method, label) in methods.iter_mut().zip(&labels) {
            let offsets = offsets(&method.code);

            for (insn, offset) in method.code.iter_mut().zip(offsets) {
                let Instruction::Invoke { kind, index } = *insn else {
                    continue;
                };

                let replacement = match cache.get(&(index, kind)) {
                    Some(cached) => cached.clone(),
                    None => {
                        let resolved = self.resolve(pool, kind, index, label, offset)?;
                        cache.insert((index, kind), resolved.clone());
                        resolved
                    }
                };

                if let Some(replacement) = replacement {
                    *insn = Instruction::Invoke {
                        kind: CallKind::Static,
                        index: replacement.index,
                    };
                    debug!(
                        "Rewrote {} @{} in {}: {} -> {}",
                        label, offset, report.module, replacement.from, replacement.to
                    );
                    report.sites.push(RewrittenSite {
                        method: label.clone(),
                        offset,
                        from: replacement.from,
                        to: replacement.to,
                    });
                }
            }
        }

        report.pool_growth = pool.len() - pool_before;
        if !report.is_unchanged() {
            metrics::counter!("interpose_modules_rewritten_total").increment(1);
            metrics::counter!("interpose_call_sites_rewritten_total")
                .increment(report.call_sites() as u64);
        }
        Ok(report)
    }

    fn resolve(
        &self,
        pool: &mut ConstantPool,
        kind: CallKind,
        index: u16,
        label: &str,
        offset: u32,
    ) -> Result<Option<Replacement>, RewriteError> {
        let member = pool.method(index).ok_or_else(|| RewriteError::BadOperand {
            method: label.to_string(),
            offset,
            index,
        })?;
        let call_site = Symbol::from_descriptor(member.owner, member.name, member.descriptor, kind)
            .map_err(|error| RewriteError::Descriptor { index, error })?;

        let Some(rule) = self.rules.lookup(&call_site) else {
            return Ok(None);
        };
        let target = rule.target().clone();
        check_rule(&call_site, &target)?;

        let target_index =
            pool.intern_method(&target.owner, &target.name, &target.signature.descriptor())?;
        Ok(Some(Replacement {
            index: target_index,
            from: call_site,
            to: target,
        }))
    }
}

fn check_rule(call_site: &Symbol, target: &Symbol) -> Result<(), RuleError> {
    if !target.is_static() {
        return Err(RuleError::TargetNotStatic(target.clone()));
    }
    let expected = InterpositionRule::target_signature(call_site);
    if target.signature != expected {
        return Err(RuleError::SignatureMismatch {
            call_site: call_site.clone(),
            target: target.clone(),
            expected,
            actual: target.signature.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::registry::RuleRegistry;
    use crate::interception::symbol::Signature;
    use crate::module::builder::ModuleBuilder;
    use crate::module::constant_pool::Constant;
    use crate::module::format::{ACC_STATIC, MAX_POOL_ENTRIES};
    use crate::module::verifier::verify;
    use crate::module::transform;
    use proptest::prelude::*;

    fn sandbox_rules() -> RuleRegistry {
        let registry = RuleRegistry::new();
        registry
            .reroute_static(
                "core.System",
                "exit",
                Signature::parse("(I)V").unwrap(),
                "sandbox.Trap",
                "handleExit",
            )
            .unwrap()
            .reroute_instance(
                "core.PrintStream",
                "println",
                Signature::parse("(T)V").unwrap(),
                "sandbox.Trap",
                "handlePrint",
            )
            .unwrap();
        registry
    }

    fn subsystem_image() -> ModuleImage {
        let mut builder = ModuleBuilder::new("app.Main");
        builder
            .method("main", "()V", ACC_STATIC)
            .get_static("core.System", "out", "Lcore.PrintStream;")
            .const_str("hello")
            .invoke_instance("core.PrintStream", "println", "(T)V")
            .const_int(7)
            .invoke_static("app.Util", "helper", "(I)V")
            .const_int(2)
            .invoke_static("core.System", "exit", "(I)V")
            .ret()
            .finish();
        builder.build().unwrap()
    }

    #[test]
    fn test_rewrites_matching_sites() {
        let rules = sandbox_rules().freeze();
        let mut image = subsystem_image();
        let before = image.clone();

        let report = Rewriter::new(&rules).rewrite(&mut image).unwrap();
        assert_eq!(report.module, "app.Main");
        assert_eq!(report.call_sites(), 2);

        let code = &image.methods[0].code;
        let original = &before.methods[0].code;
        assert_eq!(code.len(), original.len());

        // println became a static call to the receiver-first handler
        let Instruction::Invoke { kind, index } = code[2] else {
            panic!("expected invoke");
        };
        assert_eq!(kind, CallKind::Static);
        let member = image.pool.method(index).unwrap();
        assert_eq!(
            (member.owner, member.name, member.descriptor),
            ("sandbox.Trap", "handlePrint", "(Lcore.PrintStream;T)V")
        );

        // Unrelated call left alone
        assert_eq!(code[4], original[4]);

        let Instruction::Invoke { kind, index } = code[6] else {
            panic!("expected invoke");
        };
        assert_eq!(kind, CallKind::Static);
        assert_eq!(image.pool.method(index).unwrap().name, "handleExit");

        // Original entries are kept in place
        assert_eq!(&image.pool.entries()[..before.pool.len()], before.pool.entries());
        assert!(verify(&image).is_ok());
    }

    #[test]
    fn test_kind_must_match() {
        // A static call to println does not match the instance rule
        let mut builder = ModuleBuilder::new("app.Odd");
        builder
            .method("main", "()V", ACC_STATIC)
            .get_static("core.System", "out", "Lcore.PrintStream;")
            .const_str("x")
            .invoke_static("core.PrintStream", "println", "(Lcore.PrintStream;T)V")
            .ret()
            .finish();
        let mut image = builder.build().unwrap();

        let rules = sandbox_rules().freeze();
        let report = Rewriter::new(&rules).rewrite(&mut image).unwrap();
        assert!(report.is_unchanged());
    }

    #[test]
    fn test_repeated_sites_share_target_entry() {
        let mut builder = ModuleBuilder::new("app.Loop");
        builder
            .method("main", "()V", ACC_STATIC)
            .const_int(1)
            .invoke_static("core.System", "exit", "(I)V")
            .const_int(2)
            .invoke_static("core.System", "exit", "(I)V")
            .ret()
            .finish();
        let mut image = builder.build().unwrap();
        let pool_before = image.pool.len();

        let rules = sandbox_rules().freeze();
        let report = Rewriter::new(&rules).rewrite(&mut image).unwrap();
        assert_eq!(report.call_sites(), 2);
        // handleExit name + Trap owner + method entry; descriptor is shared
        assert_eq!(report.pool_growth, 3);
        assert_eq!(image.pool.len(), pool_before + 3);
        assert_eq!(report.sites[0].to, report.sites[1].to);
    }

    #[test]
    fn test_transform_output_verifies() {
        let rules = sandbox_rules().freeze();
        let image = subsystem_image();
        let input = image.to_bytes().unwrap();

        let (output, report) = transform(&input, &rules).unwrap();
        assert_eq!(report.call_sites(), 2);
        // Only the pool grows; code sections keep their size
        assert!(output.len() > input.len());

        let reparsed = ModuleImage::parse(&output).unwrap();
        assert!(verify(&reparsed).is_ok());
    }

    #[test]
    fn test_pool_overflow_is_a_rewrite_error() {
        let mut builder = ModuleBuilder::new("app.Full");
        builder
            .method("main", "()V", ACC_STATIC)
            .const_int(2)
            .invoke_static("core.System", "exit", "(I)V")
            .ret()
            .finish();
        let mut image = builder.build().unwrap();

        // Room for two more entries; the exit redirect needs three
        let mut entries = image.pool.entries().to_vec();
        let padding = MAX_POOL_ENTRIES - 2 - entries.len();
        entries.extend((1_000..).take(padding).map(Constant::Int));
        image.pool = ConstantPool::from_entries(entries);
        assert!(image.to_bytes().is_ok());

        let rules = sandbox_rules().freeze();
        let err = Rewriter::new(&rules).rewrite(&mut image).unwrap_err();
        assert!(matches!(err, RewriteError::Pool(_)));
    }

    proptest! {
        #[test]
        fn test_empty_rules_is_identity(
            ints in proptest::collection::vec(any::<i64>(), 0..8),
            strings in proptest::collection::vec("[a-z]{0,12}", 0..8),
            owner in "[a-z]{1,6}\\.[A-Z][a-z]{0,6}",
        ) {
            let mut builder = ModuleBuilder::new("prop.Module");
            {
                let mut method = builder.method("main", "()V", ACC_STATIC);
                for value in &ints {
                    method.const_int(*value).pop();
                }
                for text in &strings {
                    method.const_str(text).invoke_static(&owner, "sink", "(T)V");
                }
                method.ret().finish();
            }
            let input = builder.build().unwrap().to_bytes().unwrap();

            let (output, report) = transform(&input, &RuleSet::empty()).unwrap();
            prop_assert!(report.is_unchanged());
            prop_assert_eq!(output, input);
        }
    }
}
