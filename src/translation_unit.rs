//! The top-level owner tying a single compile together.
//!
//! Mirrors §5's single-threaded, arena-owned resource model: one
//! `TranslationUnit` per input file owns the diagnostic sink, the global
//! scope, and the parsed function list, all borrowing a caller-supplied
//! `bumpalo::Bump` for AST storage so the whole tree is freed in one shot
//! when the arena is dropped.

use crate::ast::FunctionDefinition;
use crate::config::CompilerConfig;
use crate::diagnostics::DiagnosticSink;
use crate::parser::Parser;
use crate::preprocessor::Preprocessor;
use crate::scope::ScopeRef;
use crate::source::{IncludeStack, SourceFile};
use bumpalo::Bump;
use std::rc::Rc;

pub struct TranslationUnit<'a> {
    pub diagnostics: DiagnosticSink,
    pub function_defs: Vec<FunctionDefinition<'a>>,
    pub global_scope: ScopeRef,
}

impl<'a> TranslationUnit<'a> {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.error_count() > 0
    }
}

fn include_stack_for(config: &CompilerConfig) -> IncludeStack {
    IncludeStack::new(config.user_include_paths.clone(), config.system_include_paths.clone())
}

fn apply_cli_macros(pp: &mut Preprocessor<'_>, config: &CompilerConfig) {
    for define in &config.defines {
        pp.define_from_cli(&define.name, define.value.as_deref());
    }
    for name in &config.undefines {
        pp.undefine_from_cli(name);
    }
}

/// Run the full pipeline — preprocess, then parse — over `file`, allocating
/// AST nodes out of `arena`. The diagnostic sink lives inside the returned
/// `TranslationUnit`, not as a separate borrow, so the preprocessor and
/// parser can share it without a second live `&mut` to the same sink.
pub fn compile<'a>(file: Rc<SourceFile>, config: &CompilerConfig, arena: &'a Bump) -> TranslationUnit<'a> {
    let mut diagnostics = DiagnosticSink::new();
    let include_stack = include_stack_for(config);
    let mut pp = Preprocessor::new(file, include_stack, &mut diagnostics, "Jan  1 2024", "00:00:00");
    apply_cli_macros(&mut pp, config);
    let mut parser = Parser::new(&mut pp, arena);
    parser.parse_translation_unit();
    let function_defs = std::mem::take(&mut parser.function_defs);
    let global_scope = parser.into_global_scope();
    TranslationUnit { diagnostics, function_defs, global_scope }
}

/// Run the preprocessor alone (`-E`) and re-serialize its token stream as
/// text: tokens on the same source line are separated by a single space
/// only where the original had intervening whitespace, and a `#line`
/// marker is emitted whenever the apparent file or line would otherwise
/// drift from the token's real source location.
pub fn preprocess_to_text(file: Rc<SourceFile>, config: &CompilerConfig) -> (String, DiagnosticSink) {
    let mut diagnostics = DiagnosticSink::new();
    let include_stack = include_stack_for(config);
    let mut pp = Preprocessor::new(file, include_stack, &mut diagnostics, "Jan  1 2024", "00:00:00");
    apply_cli_macros(&mut pp, config);

    let mut out = String::new();
    let mut last_line: Option<u32> = None;
    let mut last_file: Option<String> = None;
    loop {
        let tok = pp.next_token();
        if tok.is_eof() {
            break;
        }
        let file_name = tok.location.file.display_name().to_string();
        let same_file = last_file.as_deref() == Some(file_name.as_str());
        let contiguous = same_file && last_line.map(|l| l + 1) == Some(tok.location.line);
        let same_line = same_file && last_line == Some(tok.location.line);

        if !same_file || (!contiguous && !same_line) {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&format!("#line {} \"{}\"\n", tok.location.line, file_name));
        } else if contiguous {
            out.push('\n');
        } else if tok.leading_whitespace && !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&tok.text);
        last_line = Some(tok.location.line);
        last_file = Some(file_name);
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    (out, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceFile;

    #[test]
    fn compiles_a_trivial_function_with_no_diagnostics() {
        let arena = Bump::new();
        let file = Rc::new(SourceFile::from_str("t.c", "int add(int a, int b) { return a + b; }"));
        let tu = compile(file, &CompilerConfig::new(), &arena);
        assert!(!tu.has_errors(), "{:?}", tu.diagnostics.iter().map(|d| d.to_string()).collect::<Vec<_>>());
        assert_eq!(tu.function_defs.len(), 1);
        assert_eq!(tu.function_defs[0].name, "add");
    }

    #[test]
    fn command_line_defines_feed_the_preprocessor() {
        let arena = Bump::new();
        let file = Rc::new(SourceFile::from_str("t.c", "#if GREETING\nint ok(void) { return 1; }\n#else\nbad declaration\n#endif\n"));
        let config = CompilerConfig::new().with_define(crate::config::MacroDefine::parse("GREETING=1").unwrap());
        let tu = compile(file, &config, &arena);
        assert!(!tu.has_errors(), "{:?}", tu.diagnostics.iter().map(|d| d.to_string()).collect::<Vec<_>>());
        assert_eq!(tu.function_defs.len(), 1);
    }

    #[test]
    fn preprocess_only_expands_macros_and_keeps_tokens_on_one_line() {
        let file = Rc::new(SourceFile::from_str("t.c", "#define TWICE(x) ((x) + (x))\nint v = TWICE(21);\n"));
        let (text, diagnostics) = preprocess_to_text(file, &CompilerConfig::new());
        assert!(diagnostics.is_empty());
        assert!(!text.contains("TWICE"), "macro name should be expanded away: {text:?}");
        assert_eq!(text.matches("21").count(), 2, "expansion should duplicate the argument: {text:?}");
        assert_eq!(text.lines().filter(|l| !l.is_empty()).count(), 1);
    }
}
