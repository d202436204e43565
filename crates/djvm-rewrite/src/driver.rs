//! The rewrite driver: composes rules, definition providers, emitters, and
//! the remapper over one class and emits the final bytes.

use std::collections::{BTreeSet, HashMap};

use djvm_classfile::{
    opcode, AccessFlags, ClassFile, ClassFormatError, CodeElement, Field, Insn, LabelId, Method,
    MethodBody,
};
use djvm_error::{Diagnostic, SandboxClassLoadingError};
use thiserror::Error;

use crate::analysis::{AnalysisContext, ClassRecord, MemberRecord};
use crate::config::SandboxConfiguration;
use crate::emitters::EmitContext;
use crate::remapper::Remapper;
use crate::runtime;

/// Errors from a single class rewrite.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RewriteError {
    /// The input (or, pathologically, the output) failed the codec.
    #[error(transparent)]
    Format(#[from] ClassFormatError),

    /// Analysis collected error-severity diagnostics.
    #[error(transparent)]
    Loading(#[from] SandboxClassLoadingError),
}

/// A successfully rewritten class.
#[derive(Debug, Clone)]
pub struct RewrittenClass {
    /// The class's sandbox internal name.
    pub sandbox_name: String,
    /// The host internal name the input declared.
    pub host_name: String,
    /// The final class bytes.
    pub bytes: Vec<u8>,
    /// Sandbox names the rewritten class refers to.
    pub references: BTreeSet<String>,
    /// Non-fatal diagnostics at or above the configured severity.
    pub diagnostics: Vec<Diagnostic>,
}

/// Drives the full pipeline over single classes.
pub struct RewriteDriver<'a> {
    config: &'a SandboxConfiguration,
}

impl<'a> RewriteDriver<'a> {
    /// A driver over one configuration.
    pub fn new(config: &'a SandboxConfiguration) -> Self {
        Self { config }
    }

    /// Rewrite one class. On fatal analysis results this aborts with a
    /// [`SandboxClassLoadingError`] aggregating every retained diagnostic;
    /// nothing is published on failure.
    pub fn rewrite(&self, host_bytes: &[u8]) -> Result<RewrittenClass, RewriteError> {
        let parsed = ClassFile::parse(host_bytes)?;
        let resolver = self.config.resolver();

        let mut ctx = AnalysisContext::new(
            ClassRecord {
                host_name: parsed.name.clone(),
                sandbox_name: resolver.resolve_type(&parsed.name),
                access: parsed.access,
                super_name: parsed.super_name.clone(),
                interfaces: parsed.interfaces.clone(),
                source_file: parsed.source_file.clone(),
                major_version: parsed.major_version,
            },
            self.config.analysis_configuration().clone(),
        );

        for rule in self.config.rules() {
            rule.check_class(&mut ctx);
        }

        let mut class_record = ctx.class.clone();
        for provider in self.config.providers() {
            class_record = provider.rewrite_class(&mut ctx, class_record);
        }
        ctx.class = class_record.clone();

        let mut members = Vec::with_capacity(parsed.fields.len() + parsed.methods.len());
        for field in &parsed.fields {
            members.push(MemberRecord {
                owner: parsed.name.clone(),
                name: field.name.clone(),
                descriptor: field.descriptor.clone(),
                access: field.access,
                constant_value: field.constant_value.clone(),
                exceptions: Vec::new(),
                body: None,
                annotations: field.annotations.clone(),
            });
        }
        for method in &parsed.methods {
            members.push(MemberRecord {
                owner: parsed.name.clone(),
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
                access: method.access,
                constant_value: None,
                exceptions: method.exceptions.clone(),
                body: method.body.clone(),
                annotations: method.annotations.clone(),
            });
        }

        let mut rewritten_members = Vec::with_capacity(members.len());
        for mut member in members {
            ctx.enter_member(Some(member.display_name()));
            for rule in self.config.rules() {
                rule.check_member(&mut ctx, &member);
            }
            for provider in self.config.providers() {
                member = provider.rewrite_member(&mut ctx, member);
            }
            if let Some(body) = member.body.take() {
                member.body = Some(self.emit_body(&mut ctx, &member, body));
            }
            rewritten_members.push(member);
        }
        ctx.enter_member(None);

        let pending = ctx.take_pending_string_fields();
        if !pending.is_empty() {
            install_string_field_initializers(&parsed.name, &mut rewritten_members, pending);
        }

        if ctx.has_errors() {
            return Err(ctx.into_failure().into());
        }
        let diagnostics = ctx.retained();

        let sandbox_name = class_record.sandbox_name.clone();
        let mut output = assemble(&parsed, &class_record, rewritten_members);
        let mut remapper = Remapper::new(resolver, &ctx.config.visible_annotations);
        remapper.remap_class(&mut output);
        let references = remapper.into_references(&sandbox_name);

        let bytes = output.to_bytes()?;
        tracing::debug!(
            class = %sandbox_name,
            references = references.len(),
            "rewrote class"
        );
        Ok(RewrittenClass {
            sandbox_name,
            host_name: class_record.host_name.clone(),
            bytes,
            references,
            diagnostics,
        })
    }

    /// Stream one method body through the emitter chain.
    fn emit_body(&self, ctx: &mut AnalysisContext, member: &MemberRecord, body: MethodBody) -> MethodBody {
        let emitters = self.config.emitters();
        let mut emit_ctx = EmitContext {
            analysis: ctx,
            resolver: self.config.resolver(),
            catalog: self.config.catalog(),
            member_name: &member.name,
            member_descriptor: &member.descriptor,
        };

        // Handler-entry injections, keyed by handler label. When several
        // table entries share a handler the first entry decides.
        let mut handler_injections: HashMap<LabelId, Vec<Insn>> = HashMap::new();
        for handler in &body.try_catch {
            if handler_injections.contains_key(&handler.handler) {
                continue;
            }
            let mut injected = Vec::new();
            for emitter in emitters {
                injected.extend(emitter.emit_handler(&mut emit_ctx, handler));
            }
            handler_injections.insert(handler.handler, injected);
        }

        let mut elements = Vec::with_capacity(body.elements.len());
        for element in &body.elements {
            match element {
                CodeElement::Label(label) => {
                    elements.push(CodeElement::Label(*label));
                    if let Some(injected) = handler_injections.remove(label) {
                        elements.extend(injected.into_iter().map(CodeElement::Insn));
                    }
                }
                CodeElement::LineNumber(line) => elements.push(CodeElement::LineNumber(*line)),
                CodeElement::Insn(insn) => {
                    let mut replacement: Option<Vec<Insn>> = None;
                    let mut postlude = Vec::new();
                    for emitter in emitters {
                        let emission = emitter.emit(&mut emit_ctx, insn);
                        elements.extend(emission.prelude.into_iter().map(CodeElement::Insn));
                        postlude.extend(emission.postlude);
                        if emission.replacement.is_some() {
                            replacement = emission.replacement;
                            break;
                        }
                    }
                    match replacement {
                        Some(instructions) => {
                            elements.extend(instructions.into_iter().map(CodeElement::Insn))
                        }
                        None => elements.push(CodeElement::Insn(insn.clone())),
                    }
                    elements.extend(postlude.into_iter().map(CodeElement::Insn));
                }
            }
        }

        body.with_elements(elements)
    }
}

/// Prepend the deferred constant-string stores to the static initializer,
/// synthesizing one when the class has none.
fn install_string_field_initializers(
    owner: &str,
    members: &mut Vec<MemberRecord>,
    pending: Vec<(String, String)>,
) {
    let mut prologue = Vec::with_capacity(pending.len() * 3);
    for (field_name, value) in pending {
        prologue.push(CodeElement::Insn(Insn::ldc_string(value)));
        prologue.push(CodeElement::Insn(Insn::invoke_static(
            runtime::DJVM,
            "intern",
            "(Ljava/lang/String;)Lsandbox/java/lang/String;",
        )));
        prologue.push(CodeElement::Insn(Insn::Field {
            opcode: opcode::PUTSTATIC,
            owner: owner.to_owned(),
            name: field_name,
            descriptor: format!("L{};", runtime::SANDBOX_STRING),
        }));
    }

    if let Some(clinit) = members
        .iter_mut()
        .find(|m| m.name == "<clinit>" && m.descriptor == "()V")
    {
        match &mut clinit.body {
            Some(body) => {
                prologue.append(&mut body.elements);
                body.elements = prologue;
            }
            None => {
                let mut body = MethodBody::new();
                body.elements = prologue;
                body.elements.push(CodeElement::Insn(Insn::Simple(opcode::RETURN)));
                clinit.body = Some(body);
            }
        }
        return;
    }

    let mut body = MethodBody::new();
    body.elements = prologue;
    body.elements.push(CodeElement::Insn(Insn::Simple(opcode::RETURN)));
    members.push(MemberRecord {
        owner: owner.to_owned(),
        name: "<clinit>".into(),
        descriptor: "()V".into(),
        access: AccessFlags::STATIC,
        constant_value: None,
        exceptions: Vec::new(),
        body: Some(body),
        annotations: Vec::new(),
    });
}

/// Rebuild a class file from the rewritten records, carrying over the
/// structural attributes of the input.
fn assemble(parsed: &ClassFile, class_record: &ClassRecord, members: Vec<MemberRecord>) -> ClassFile {
    let mut fields = Vec::new();
    let mut methods = Vec::new();
    for member in members {
        if member.is_method() {
            methods.push(Method {
                access: member.access,
                name: member.name,
                descriptor: member.descriptor,
                exceptions: member.exceptions,
                body: member.body,
                annotations: member.annotations,
            });
        } else {
            fields.push(Field {
                access: member.access,
                name: member.name,
                descriptor: member.descriptor,
                constant_value: member.constant_value,
                annotations: member.annotations,
            });
        }
    }
    ClassFile {
        minor_version: parsed.minor_version,
        major_version: parsed.major_version,
        access: class_record.access,
        name: class_record.host_name.clone(),
        super_name: class_record.super_name.clone(),
        interfaces: class_record.interfaces.clone(),
        fields,
        methods,
        source_file: class_record.source_file.clone(),
        inner_classes: parsed.inner_classes.clone(),
        enclosing_method: parsed.enclosing_method.clone(),
        annotations: parsed.annotations.clone(),
        bootstrap_methods: parsed.bootstrap_methods.clone(),
    }
}
