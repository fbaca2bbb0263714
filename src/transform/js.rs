//! Script transformer
//!
//! Dependency discovery is pattern based: static `import`/`export ... from`
//! and `require()` become synchronous dependencies, `import()` becomes an
//! asynchronous one and is rewritten to `require.lazy()` so the packaged
//! module registry can route it through the loader runtime. Module syntax is
//! lowered to `require`/`exports` line by line, so line numbers survive.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use semver::{Version, VersionReq};
use tracing::debug;

use crate::config::BuildOptions;
use crate::types::{Asset, AssetOutput, Ast, AstKind, DependencyOptions, Position, SourceLocation};

use super::{line_column, TransformOutput, Transformer, TransformerConfig};

/// Regex patterns for extracting imports
static IMPORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:import|export)\s+(?:(?:\{[^}]*\}|\*\s+as\s+\w+|\w+)\s+from\s+)?["']([^"']+)["']|require\s*\(\s*["']([^"']+)["']\s*\)"#).unwrap()
});

static DYNAMIC_IMPORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"import\s*\(\s*["']([^"']+)["']\s*\)"#).unwrap()
});

static IMPORT_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^([ \t]*)import\s+(?:([\w$*{}\s,]+?)\s+from\s+)?["']([^"']+)["'][ \t]*;?"#).unwrap()
});

static EXPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^([ \t]*)export\s+(\*|\{[^}]*\})\s+from\s+["']([^"']+)["'][ \t]*;?"#).unwrap()
});

static EXPORT_DEFAULT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^([ \t]*)export\s+default\s+").unwrap());

static EXPORT_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([ \t]*)export\s+((?:async\s+)?function\*?|class|const|let|var)\s+([\w$]+)").unwrap()
});

static EXPORT_LIST: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^([ \t]*)export\s+\{([^}]*)\}[ \t]*;?").unwrap());

static SCRIPT_VERSION: Lazy<Version> = Lazy::new(|| Version::new(1, 0, 0));

static SCRIPT_RANGE: Lazy<VersionReq> = Lazy::new(|| VersionReq::parse("^1.0.0").unwrap());

/// Script representation shared between parse, transform and generate
#[derive(Debug, Clone)]
pub struct ScriptProgram {
    pub text: String,
}

#[derive(Debug, Default)]
pub struct JsTransformer;

impl JsTransformer {
    pub fn new() -> Self {
        Self
    }

    fn location(asset: &Asset, source: &str, start: usize, end: usize) -> SourceLocation {
        let (line, column) = line_column(source, start);
        let (end_line, end_column) = line_column(source, end);
        SourceLocation {
            file_path: asset.file_path.clone(),
            start: Position { line, column },
            end: Position {
                line: end_line,
                column: end_column,
            },
        }
    }
}

impl Transformer for JsTransformer {
    fn name(&self) -> &str {
        "js"
    }

    fn can_reuse_ast(&self, ast: &Ast) -> bool {
        ast.is_compatible(AstKind::Script, &SCRIPT_RANGE)
    }

    fn parse(
        &self,
        asset: &Asset,
        _config: Option<&TransformerConfig>,
        _options: &BuildOptions,
    ) -> Result<Option<Ast>> {
        let text = asset.code.as_str()?.to_string();
        Ok(Some(Ast::new(
            AstKind::Script,
            SCRIPT_VERSION.clone(),
            ScriptProgram { text },
        )))
    }

    fn transform(
        &self,
        mut asset: Asset,
        _config: Option<&TransformerConfig>,
        _options: &BuildOptions,
    ) -> Result<Vec<TransformOutput>> {
        let source = match asset.ast.as_ref().and_then(|ast| ast.program::<ScriptProgram>()) {
            Some(program) => program.text.clone(),
            None => asset.code.as_str()?.to_string(),
        };

        // Static imports/exports and require calls
        for cap in IMPORT_REGEX.captures_iter(&source) {
            if let Some(specifier) = cap.get(1).or_else(|| cap.get(2)) {
                let whole = cap.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
                let mut options = DependencyOptions::new(specifier.as_str());
                options.loc = Some(Self::location(&asset, &source, whole.0, whole.1));
                asset.add_dependency(options);
            }
        }

        // Dynamic imports
        for cap in DYNAMIC_IMPORT_REGEX.captures_iter(&source) {
            if let (Some(whole), Some(specifier)) = (cap.get(0), cap.get(1)) {
                let mut options = DependencyOptions::new(specifier.as_str()).asynchronous();
                options.loc = Some(Self::location(&asset, &source, whole.start(), whole.end()));
                asset.add_dependency(options);
            }
        }

        let rewritten = DYNAMIC_IMPORT_REGEX
            .replace_all(&source, r#"require.lazy("$1")"#)
            .into_owned();
        let rewritten = to_commonjs(&rewritten);

        debug!(
            "Found {} dependencies in {}",
            asset.dependencies.len(),
            asset.file_path.display()
        );

        asset.asset_type = "js".to_string();
        asset.ast = Some(Ast::new(
            AstKind::Script,
            SCRIPT_VERSION.clone(),
            ScriptProgram { text: rewritten },
        ));

        Ok(vec![TransformOutput::Asset(asset)])
    }

    fn generate(
        &self,
        asset: &Asset,
        _config: Option<&TransformerConfig>,
        _options: &BuildOptions,
    ) -> Result<Option<AssetOutput>> {
        Ok(asset
            .ast
            .as_ref()
            .and_then(|ast| ast.program::<ScriptProgram>())
            .map(|program| AssetOutput {
                code: program.text.clone().into(),
                ..AssetOutput::default()
            }))
    }
}

enum ImportBinding {
    Default(String),
    Namespace(String),
    /// Imported name, local name
    Named(String, String),
}

/// Split `a, b as c` into (imported, local) pairs
fn specifier_list(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once(" as ") {
            Some((imported, local)) => (imported.trim().to_string(), local.trim().to_string()),
            None => (item.to_string(), item.to_string()),
        })
        .collect()
}

fn import_bindings(clause: &str) -> Vec<ImportBinding> {
    let (outside, named) = match (clause.find('{'), clause.rfind('}')) {
        (Some(open), Some(close)) if open < close => (
            format!("{} {}", &clause[..open], &clause[close + 1..]),
            Some(&clause[open + 1..close]),
        ),
        _ => (clause.to_string(), None),
    };

    let mut bindings = Vec::new();
    for piece in outside.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match piece.strip_prefix('*') {
            Some(rest) => {
                let name = rest.trim().trim_start_matches("as").trim();
                bindings.push(ImportBinding::Namespace(name.to_string()));
            }
            None => bindings.push(ImportBinding::Default(piece.to_string())),
        }
    }
    if let Some(named) = named {
        for (imported, local) in specifier_list(named) {
            bindings.push(ImportBinding::Named(imported, local));
        }
    }
    bindings
}

/// Lower `import`/`export` statements to the registry's `require`/`exports`
fn to_commonjs(source: &str) -> String {
    let mut counter = 0usize;
    let mut exported: Vec<(String, String)> = Vec::new();
    let mut is_module = false;

    let text = IMPORT_STATEMENT.replace_all(source, |caps: &Captures| {
        let indent = &caps[1];
        let specifier = &caps[3];
        let Some(clause) = caps.get(2) else {
            return format!(r#"{}require("{}");"#, indent, specifier);
        };

        let binding = format!("__import{}", counter);
        counter += 1;
        let mut statements = vec![format!(r#"var {} = require("{}");"#, binding, specifier)];
        for import in import_bindings(clause.as_str()) {
            statements.push(match import {
                ImportBinding::Default(name) => format!(
                    "var {name} = {b} && {b}.__esModule ? {b}.default : {b};",
                    name = name,
                    b = binding
                ),
                ImportBinding::Namespace(name) => format!("var {} = {};", name, binding),
                ImportBinding::Named(imported, local) => {
                    format!("var {} = {}.{};", local, binding, imported)
                }
            });
        }
        format!("{}{}", indent, statements.join(" "))
    });

    let text = EXPORT_FROM.replace_all(&text, |caps: &Captures| {
        is_module = true;
        let indent = &caps[1];
        let specifier = &caps[3];
        if &caps[2] == "*" {
            return format!(r#"{}Object.assign(exports, require("{}"));"#, indent, specifier);
        }

        let binding = format!("__reexport{}", counter);
        counter += 1;
        let mut statements = vec![format!(r#"var {} = require("{}");"#, binding, specifier)];
        let list = caps[2].trim_start_matches('{').trim_end_matches('}');
        for (imported, name) in specifier_list(list) {
            statements.push(format!("exports.{} = {}.{};", name, binding, imported));
        }
        format!("{}{}", indent, statements.join(" "))
    });

    let text = EXPORT_DEFAULT.replace_all(&text, |caps: &Captures| {
        is_module = true;
        format!("{}exports.default = ", &caps[1])
    });

    let text = EXPORT_DECLARATION.replace_all(&text, |caps: &Captures| {
        is_module = true;
        exported.push((caps[3].to_string(), caps[3].to_string()));
        format!("{}{} {}", &caps[1], &caps[2], &caps[3])
    });

    let text = EXPORT_LIST.replace_all(&text, |caps: &Captures| {
        is_module = true;
        exported.extend(specifier_list(&caps[2]));
        caps[1].to_string()
    });

    if !is_module {
        return text.into_owned();
    }

    let mut output = String::from(r#"Object.defineProperty(exports, "__esModule", { value: true }); "#);
    output.push_str(&text);
    for (local, name) in exported {
        if !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&format!("exports.{} = {};", name, local));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::types::Code;

    fn options() -> BuildOptions {
        BuildOptions::with_defaults("/project")
    }

    fn run(source: &str) -> Asset {
        let transformer = JsTransformer::new();
        let options = options();
        let mut asset = Asset::new("/project/src/index.jsx", Environment::default(), Code::from(source));
        asset.ast = transformer.parse(&asset, None, &options).unwrap();

        let mut outputs = transformer.transform(asset, None, &options).unwrap();
        match outputs.remove(0) {
            TransformOutput::Asset(asset) => asset,
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_extracts_static_and_dynamic_dependencies() {
        let asset = run(
            "import './local.css';\nimport { a } from \"./a\";\nconst b = require('./b');\nimport('./lazy').then(m => m);\n",
        );

        let specifiers: Vec<_> = asset
            .dependencies
            .iter()
            .map(|d| (d.specifier.as_str(), d.is_async))
            .collect();
        assert_eq!(
            specifiers,
            vec![
                ("./local.css", false),
                ("./a", false),
                ("./b", false),
                ("./lazy", true)
            ]
        );

        let lazy = &asset.dependencies[3];
        assert_eq!(lazy.loc.as_ref().unwrap().start, Position { line: 4, column: 1 });
        assert_eq!(asset.asset_type, "js");
    }

    #[test]
    fn test_dynamic_imports_are_routed_through_lazy_require() {
        let transformer = JsTransformer::new();
        let asset = run("import('./lazy');");
        let output = transformer.generate(&asset, None, &options()).unwrap().unwrap();

        assert_eq!(output.code.as_str().unwrap(), r#"require.lazy("./lazy");"#);
    }

    #[test]
    fn test_module_syntax_is_lowered_line_by_line() {
        let source = "import './local.css';\nimport styles, { a, b as c } from './a';\nimport * as ns from './ns';\nexport const answer = 42;\nexport default styles;\nexport { c as d };\nexport * from './all';";

        assert_eq!(
            to_commonjs(source),
            [
                r#"Object.defineProperty(exports, "__esModule", { value: true }); require("./local.css");"#,
                r#"var __import0 = require("./a"); var styles = __import0 && __import0.__esModule ? __import0.default : __import0; var a = __import0.a; var c = __import0.b;"#,
                r#"var __import1 = require("./ns"); var ns = __import1;"#,
                "const answer = 42;",
                "exports.default = styles;",
                "",
                r#"Object.assign(exports, require("./all"));"#,
                "exports.answer = answer;",
                "exports.d = c;",
            ]
            .join("\n")
        );
    }

    #[test]
    fn test_commonjs_passes_through() {
        let source = "const a = require('./a');\nmodule.exports = a;\n";
        assert_eq!(to_commonjs(source), source);
    }

    #[test]
    fn test_reuses_only_script_representations() {
        let transformer = JsTransformer::new();
        let script = Ast::new(AstKind::Script, Version::new(1, 2, 0), ScriptProgram { text: String::new() });
        let newer = Ast::new(AstKind::Script, Version::new(2, 0, 0), ScriptProgram { text: String::new() });
        let sheet = Ast::new(AstKind::Stylesheet, Version::new(1, 0, 0), ());

        assert!(transformer.can_reuse_ast(&script));
        assert!(!transformer.can_reuse_ast(&newer));
        assert!(!transformer.can_reuse_ast(&sheet));
    }
}
