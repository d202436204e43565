//! Class- and member-level validation rules.
//!
//! Rules only record diagnostics; the driver aborts the load when any
//! error-severity diagnostic exists once the whole class has been walked.

use djvm_classfile::descriptor;
use djvm_error::Severity;

use crate::analysis::{AnalysisContext, MemberRecord};
use crate::runtime;

/// A validation rule over the class under analysis.
pub trait Rule: Send + Sync {
    /// Check class-level properties.
    fn check_class(&self, _ctx: &mut AnalysisContext) {}

    /// Check one declared member.
    fn check_member(&self, _ctx: &mut AnalysisContext, _member: &MemberRecord) {}
}

/// The default rule list.
pub fn standard_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(DisallowUnsupportedClassVersion),
        Box::new(DisallowReservedNames),
    ]
}

/// Rejects class files newer than the version ceiling the deterministic
/// runtime understands.
pub struct DisallowUnsupportedClassVersion;

impl Rule for DisallowUnsupportedClassVersion {
    fn check_class(&self, ctx: &mut AnalysisContext) {
        let ceiling = ctx.config.version_ceiling;
        let declared = ctx.class.major_version;
        if declared > ceiling {
            ctx.record(
                Severity::Error,
                format!("Unsupported class file major version {declared} (ceiling is {ceiling})"),
            );
        }
    }
}

/// Rejects user classes that declare members whose names are reserved for
/// the deterministic runtime.
pub struct DisallowReservedNames;

impl Rule for DisallowReservedNames {
    fn check_member(&self, ctx: &mut AnalysisContext, member: &MemberRecord) {
        if ctx.class.host_name.starts_with(runtime::SANDBOX_PREFIX) {
            // The runtime's own classes legitimately implement these.
            return;
        }
        if !runtime::RESERVED_MEMBER_NAMES.contains(&member.name.as_str()) {
            return;
        }
        let display = if member.is_method() {
            let args = descriptor::method_parts(&member.descriptor)
                .map(|(params, _)| {
                    params
                        .iter()
                        .map(|t| descriptor::short_type_name(t))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            format!("{}({args})", member.name)
        } else {
            member.name.clone()
        };
        ctx.record(
            Severity::Error,
            format!("Class is not allowed to implement {display}"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisConfiguration, ClassRecord};
    use djvm_classfile::AccessFlags;

    fn context(host_name: &str, major_version: u16) -> AnalysisContext {
        AnalysisContext::new(
            ClassRecord {
                host_name: host_name.into(),
                sandbox_name: format!("sandbox/{host_name}"),
                access: AccessFlags::PUBLIC,
                super_name: Some("java/lang/Object".into()),
                interfaces: Vec::new(),
                source_file: None,
                major_version,
            },
            AnalysisConfiguration::default(),
        )
    }

    fn member(name: &str, descriptor: &str) -> MemberRecord {
        MemberRecord {
            owner: "com/example/Task".into(),
            name: name.into(),
            descriptor: descriptor.into(),
            access: AccessFlags::PUBLIC,
            constant_value: None,
            exceptions: Vec::new(),
            body: None,
            annotations: Vec::new(),
        }
    }

    #[test]
    fn reserved_method_name_is_an_error() {
        let mut ctx = context("com/example/Task", 52);
        DisallowReservedNames.check_member(&mut ctx, &member("toDJVMString", "()Ljava/lang/String;"));
        assert!(ctx.has_errors());
        assert!(ctx.diagnostics()[0]
            .message
            .contains("Class is not allowed to implement toDJVMString()"));
    }

    #[test]
    fn runtime_classes_may_use_reserved_names() {
        let mut ctx = context("sandbox/java/lang/String", 52);
        DisallowReservedNames.check_member(&mut ctx, &member("fromDJVM", "()Ljava/lang/String;"));
        assert!(!ctx.has_errors());
    }

    #[test]
    fn ordinary_names_pass() {
        let mut ctx = context("com/example/Task", 52);
        DisallowReservedNames.check_member(&mut ctx, &member("toString", "()Ljava/lang/String;"));
        assert!(!ctx.has_errors());
    }

    #[test]
    fn version_above_ceiling_is_an_error() {
        let mut ctx = context("com/example/Task", 55);
        DisallowUnsupportedClassVersion.check_class(&mut ctx);
        assert!(ctx.has_errors());
        assert!(ctx.diagnostics()[0].message.contains("major version 55"));
    }

    #[test]
    fn version_at_ceiling_passes() {
        let mut ctx = context("com/example/Task", 52);
        DisallowUnsupportedClassVersion.check_class(&mut ctx);
        assert!(!ctx.has_errors());
    }
}
