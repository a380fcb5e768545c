//! Staged compilation.
//!
//! `compile` runs the pipeline stage by stage and reports each requested
//! stage's output, or the diagnostic it failed with, without ever returning
//! an error itself. `emit` is the all-or-nothing variant used by the CLI.

use core::fmt;
use core::str::FromStr;

use serde::Serialize;

use crate::ast::Program;
use crate::codegen::TargetKind;
use crate::error::{CodeGenError, CoreError};
use crate::ir::Instruction;
use crate::irgen::generate;
use crate::lexer::{LexResult, lex};
use crate::parser::{parse, parse_source};
use crate::semantic::{SymbolTable, analyze};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Lexical,
    Syntax,
    Semantic,
    Intermediate,
    Target,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Lexical,
        Stage::Syntax,
        Stage::Semantic,
        Stage::Intermediate,
        Stage::Target,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Lexical => "lexical",
            Stage::Syntax => "syntax",
            Stage::Semantic => "semantic",
            Stage::Intermediate => "intermediate",
            Stage::Target => "target",
        }
    }

    /// Stages whose output this stage consumes.
    pub fn prerequisites(self) -> &'static [Stage] {
        match self {
            Stage::Lexical => &[],
            Stage::Syntax => &[Stage::Lexical],
            Stage::Semantic => &[Stage::Syntax],
            Stage::Intermediate => &[Stage::Syntax, Stage::Semantic],
            Stage::Target => &[Stage::Intermediate],
        }
    }

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageSet(u8);

impl StageSet {
    pub fn all() -> Self {
        Stage::ALL.into_iter().collect()
    }

    /// Parses a comma-separated list such as `lexical,syntax`.
    pub fn parse(list: &str) -> Result<Self, String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Stage::from_str)
            .collect()
    }

    pub fn insert(&mut self, stage: Stage) {
        self.0 |= stage.bit();
    }

    pub fn contains(self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// This set plus everything its stages transitively depend on.
    pub fn with_prerequisites(self) -> Self {
        let mut closed = self;
        for stage in Stage::ALL.into_iter().rev() {
            if closed.contains(stage) {
                for prerequisite in stage.prerequisites() {
                    closed.insert(*prerequisite);
                }
            }
        }
        closed
    }

    pub fn iter(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl FromIterator<Stage> for StageSet {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        let mut set = StageSet::default();
        for stage in iter {
            set.insert(stage);
        }
        set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub stages: StageSet,
    pub target: TargetKind,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            stages: StageSet::all(),
            target: TargetKind::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StageOutcome<T> {
    Ok { output: T },
    Failed { diagnostic: String },
}

impl<T> StageOutcome<T> {
    pub fn output(&self) -> Option<&T> {
        match self {
            StageOutcome::Ok { output } => Some(output),
            StageOutcome::Failed { .. } => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            StageOutcome::Ok { .. } => None,
            StageOutcome::Failed { diagnostic } => Some(diagnostic),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetOutput {
    pub kind: TargetKind,
    pub text: String,
}

/// Per-stage results; `None` for stages that were not requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical: Option<StageOutcome<LexResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syntax: Option<StageOutcome<Program>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic: Option<StageOutcome<SymbolTable>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intermediate: Option<StageOutcome<Vec<Instruction>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<StageOutcome<TargetOutput>>,
}

impl CompileReport {
    /// True when no reported stage failed.
    pub fn succeeded(&self) -> bool {
        self.diagnostics().next().is_none()
    }

    /// `(stage, diagnostic)` for every reported failure.
    pub fn diagnostics(&self) -> impl Iterator<Item = (Stage, &str)> {
        [
            (Stage::Lexical, self.lexical.as_ref().and_then(|o| o.diagnostic())),
            (Stage::Syntax, self.syntax.as_ref().and_then(|o| o.diagnostic())),
            (Stage::Semantic, self.semantic.as_ref().and_then(|o| o.diagnostic())),
            (
                Stage::Intermediate,
                self.intermediate.as_ref().and_then(|o| o.diagnostic()),
            ),
            (Stage::Target, self.target.as_ref().and_then(|o| o.diagnostic())),
        ]
        .into_iter()
        .filter_map(|(stage, diagnostic)| diagnostic.map(|d| (stage, d)))
    }
}

struct StageRun {
    requested: StageSet,
    needed: StageSet,
    succeeded: StageSet,
    first_failure: Option<Stage>,
}

impl StageRun {
    /// Runs `stage` when it is needed and its prerequisites succeeded, storing
    /// the outcome in `slot` when it was requested.
    fn run<T: Clone>(
        &mut self,
        stage: Stage,
        slot: &mut Option<StageOutcome<T>>,
        body: impl FnOnce() -> Result<T, String>,
    ) -> Option<T> {
        if !self.needed.contains(stage) {
            return None;
        }
        let result = match self.blocker(stage) {
            Some(blocking) => Err(format!("not run because the {blocking} stage failed")),
            None => body(),
        };
        match &result {
            Ok(_) => self.succeeded.insert(stage),
            Err(_) => {
                self.first_failure.get_or_insert(stage);
            }
        }
        if crate::log::is_verbose() {
            match &result {
                Ok(_) => eprintln!("compile: {stage} stage ok"),
                Err(diagnostic) => eprintln!("compile: {stage} stage failed: {diagnostic}"),
            }
        }
        if self.requested.contains(stage) {
            *slot = Some(match &result {
                Ok(output) => StageOutcome::Ok {
                    output: output.clone(),
                },
                Err(diagnostic) => StageOutcome::Failed {
                    diagnostic: diagnostic.clone(),
                },
            });
        }
        result.ok()
    }

    fn blocker(&self, stage: Stage) -> Option<Stage> {
        let missing = stage
            .prerequisites()
            .iter()
            .copied()
            .find(|p| !self.succeeded.contains(*p))?;
        Some(self.first_failure.unwrap_or(missing))
    }
}

pub fn compile(source: &str, options: &CompileOptions) -> CompileReport {
    let mut run = StageRun {
        requested: options.stages,
        needed: options.stages.with_prerequisites(),
        succeeded: StageSet::default(),
        first_failure: None,
    };
    let mut report = CompileReport::default();

    let lexed = run.run(Stage::Lexical, &mut report.lexical, || Ok(lex(source)));
    let program = run.run(Stage::Syntax, &mut report.syntax, || {
        let tokens = lexed.as_ref().map(|l| l.tokens.as_slice()).unwrap_or_default();
        parse(tokens).map_err(|err| err.to_string())
    });
    let symbols = run.run(Stage::Semantic, &mut report.semantic, || match &program {
        Some(program) => analyze(program).map_err(|err| err.to_string()),
        None => Err("no syntax tree".to_string()),
    });
    let code = run.run(Stage::Intermediate, &mut report.intermediate, || {
        match (&program, &symbols) {
            (Some(program), Some(_)) => Ok(generate(program)),
            _ => Err("no analyzed syntax tree".to_string()),
        }
    });
    run.run(Stage::Target, &mut report.target, || match &code {
        Some(code) => lower(code, options.target)
            .map(|text| TargetOutput {
                kind: options.target,
                text,
            })
            .map_err(|err| err.to_string()),
        None => Err("no intermediate code".to_string()),
    });
    report
}

/// Compiles `source` straight to target text, failing on the first error.
pub fn emit(source: &str, target: TargetKind) -> Result<String, CoreError> {
    let program = parse_source(source)?;
    analyze(&program)?;
    let code = generate(&program);
    Ok(lower(&code, target)?)
}

fn lower(code: &[Instruction], target: TargetKind) -> Result<String, CodeGenError> {
    let backend = target.backend();
    if crate::log::is_verbose() {
        eprintln!(
            "compile: lowering {} instructions with the {} backend",
            code.len(),
            backend.name()
        );
    }
    backend.generate(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SemanticError;
    use crate::lexer::TokenKind;

    fn options(stages: &str, target: TargetKind) -> CompileOptions {
        CompileOptions {
            stages: StageSet::parse(stages).expect("stages"),
            target,
        }
    }

    #[test]
    fn reports_every_stage_by_default() {
        let report = compile("var x; x := 1 + 2;", &CompileOptions::default());
        assert!(report.succeeded());
        let lexical = report.lexical.as_ref().and_then(|o| o.output()).expect("tokens");
        let kinds: Vec<_> = lexical.tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Keyword,
                TokenKind::Identifier,
                TokenKind::Semicolon,
                TokenKind::Identifier,
                TokenKind::Equals,
                TokenKind::Number,
                TokenKind::Operator,
                TokenKind::Number,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
        let code = report.intermediate.as_ref().and_then(|o| o.output()).expect("ir");
        assert_eq!(code.len(), 5);
        let target = report.target.as_ref().and_then(|o| o.output()).expect("target");
        assert_eq!(target.kind, TargetKind::StackModule);
        assert!(target.text.starts_with("(module"));
    }

    #[test]
    fn runs_prerequisites_without_reporting_them() {
        let report = compile("var x; x := 2;", &options("target", TargetKind::Script));
        assert!(report.lexical.is_none());
        assert!(report.syntax.is_none());
        assert!(report.semantic.is_none());
        let target = report.target.as_ref().and_then(|o| o.output()).expect("target");
        assert!(target.text.contains("x = 2; // 1"));
    }

    #[test]
    fn semantic_failure_blocks_later_stages_only() {
        let report = compile("const a = 1;\nconst a = 2;", &CompileOptions::default());
        assert!(report.syntax.as_ref().and_then(|o| o.output()).is_some());
        let semantic = report.semantic.as_ref().and_then(|o| o.diagnostic()).expect("failure");
        assert_eq!(
            semantic,
            SemanticError::DuplicateDeclaration {
                name: "a".into(),
                line: 2
            }
            .to_string()
        );
        let blocked = report.intermediate.as_ref().and_then(|o| o.diagnostic()).expect("blocked");
        assert!(blocked.contains("semantic stage failed"), "{blocked}");
        let blocked = report.target.as_ref().and_then(|o| o.diagnostic()).expect("blocked");
        assert!(blocked.contains("semantic stage failed"), "{blocked}");
        assert_eq!(
            report.diagnostics().map(|(stage, _)| stage).collect::<Vec<_>>(),
            vec![Stage::Semantic, Stage::Intermediate, Stage::Target]
        );
    }

    #[test]
    fn syntax_failure_carries_line_and_token() {
        let report = compile("var x;\nx := ;", &options("syntax,semantic", TargetKind::StackModule));
        let syntax = report.syntax.as_ref().and_then(|o| o.diagnostic()).expect("failure");
        assert!(syntax.starts_with("line 2:"), "{syntax}");
        assert!(syntax.contains("';'"), "{syntax}");
        let semantic = report.semantic.as_ref().and_then(|o| o.diagnostic()).expect("blocked");
        assert!(semantic.contains("syntax stage failed"));
    }

    #[test]
    fn lexical_warnings_do_not_fail_the_stage() {
        let report = compile("var x; x := 1 # 2;", &options("lexical", TargetKind::StackModule));
        let lexed = report.lexical.as_ref().and_then(|o| o.output()).expect("tokens");
        assert_eq!(lexed.diagnostics.len(), 1);
        assert!(report.succeeded());
    }

    #[test]
    fn parses_stage_lists() {
        let set = StageSet::parse("semantic, target").expect("parse");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Stage::Semantic, Stage::Target]);
        assert_eq!(
            set.with_prerequisites().iter().collect::<Vec<_>>(),
            Stage::ALL.to_vec()
        );
        assert!(StageSet::parse("lexical,codegen").is_err());
        assert!(StageSet::parse("").expect("empty").is_empty());
    }

    #[test]
    fn serializes_report_with_stage_keys() {
        let report = compile("var x;", &options("intermediate", TargetKind::StackModule));
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(
            json,
            serde_json::json!({
                "intermediate": {"status": "ok", "output": [{"code": "DECLARE x", "line": 1}]}
            })
        );
    }

    #[test]
    fn emit_propagates_the_first_error() {
        assert!(emit("var x; x := 1;", TargetKind::Script).is_ok());
        assert!(matches!(
            emit("x := 1;", TargetKind::StackModule),
            Err(CoreError::Semantic(SemanticError::UndeclaredVariable { .. }))
        ));
        assert!(matches!(emit("var ;", TargetKind::StackModule), Err(CoreError::Parse(_))));
    }
}
