use anyhow::{anyhow, Result};
use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};

use crate::bundler::Bundle;
use crate::config::BuildOptions;

use super::{Optimizer, PackagedBundle};

/// Characters after which a `/` starts a regular expression rather than a division
const REGEX_PRECEDERS: &str = "(,=:[!&|?{};+-*%<>~^";

/// Strips comments and collapses whitespace in scripts.
///
/// A whitespace run that contains a line break becomes a single line
/// break, so automatic semicolon insertion still sees it.
#[derive(Debug, Default)]
pub struct JsOptimizer;

impl JsOptimizer {
    pub fn new() -> Self {
        Self
    }

    fn starts_regex(output: &str) -> bool {
        let trimmed = output.trim_end();
        match trimmed.chars().last() {
            None => true,
            Some(c) if REGEX_PRECEDERS.contains(c) => true,
            Some(_) => ["return", "typeof", "case", "in", "of"]
                .iter()
                .any(|keyword| {
                    trimmed.ends_with(keyword)
                        && !trimmed[..trimmed.len() - keyword.len()]
                            .chars()
                            .last()
                            .map(|c| c.is_alphanumeric() || c == '_' || c == '$')
                            .unwrap_or(false)
                }),
        }
    }

    pub fn minify(code: &str) -> String {
        let mut result = String::with_capacity(code.len());
        let mut chars = code.chars().peekable();

        // Whitespace seen since the last token: None, ' ' or '\n'
        let mut pending: Option<char> = None;

        while let Some(c) = chars.next() {
            if c.is_whitespace() {
                pending = Some(if c == '\n' || pending == Some('\n') { '\n' } else { ' ' });
                continue;
            }

            if c == '/' {
                match chars.peek() {
                    Some('/') => {
                        for next in chars.by_ref() {
                            if next == '\n' {
                                break;
                            }
                        }
                        pending = Some('\n');
                        continue;
                    }
                    Some('*') => {
                        chars.next();
                        let mut prev = ' ';
                        let mut newline = false;
                        for next in chars.by_ref() {
                            if prev == '*' && next == '/' {
                                break;
                            }
                            newline |= next == '\n';
                            prev = next;
                        }
                        pending = match (pending, newline) {
                            (Some('\n'), _) | (_, true) => Some('\n'),
                            _ => Some(' '),
                        };
                        continue;
                    }
                    _ => {}
                }
            }

            if let Some(space) = pending.take() {
                if !result.is_empty() {
                    result.push(space);
                }
            }

            match c {
                '"' | '\'' | '`' => {
                    result.push(c);
                    let mut escaped = false;
                    for next in chars.by_ref() {
                        result.push(next);
                        if escaped {
                            escaped = false;
                        } else if next == '\\' {
                            escaped = true;
                        } else if next == c {
                            break;
                        }
                    }
                }
                '/' if Self::starts_regex(&result) => {
                    result.push(c);
                    let mut escaped = false;
                    let mut in_class = false;
                    for next in chars.by_ref() {
                        result.push(next);
                        if escaped {
                            escaped = false;
                        } else if next == '\\' {
                            escaped = true;
                        } else if next == '[' {
                            in_class = true;
                        } else if next == ']' {
                            in_class = false;
                        } else if next == '/' && !in_class {
                            break;
                        } else if next == '\n' {
                            break;
                        }
                    }
                }
                _ => result.push(c),
            }
        }

        result
    }
}

impl Optimizer for JsOptimizer {
    fn name(&self) -> &str {
        "js"
    }

    fn optimize(
        &self,
        _bundle: &Bundle,
        packaged: PackagedBundle,
        options: &BuildOptions,
    ) -> Result<PackagedBundle> {
        if !options.minify {
            return Ok(packaged);
        }

        // Line mappings no longer hold once lines are joined
        let code = Self::minify(packaged.contents.as_str()?);
        Ok(PackagedBundle {
            contents: code.into(),
            map: None,
        })
    }
}

/// Minifies stylesheets with lightningcss
#[derive(Debug, Default)]
pub struct CssOptimizer;

impl CssOptimizer {
    pub fn new() -> Self {
        Self
    }

    pub fn minify(filename: &str, code: &str) -> Result<String> {
        let mut stylesheet = StyleSheet::parse(
            code,
            ParserOptions {
                filename: filename.to_string(),
                ..Default::default()
            },
        )
        .map_err(|e| anyhow!("Failed to parse CSS in {}: {:?}", filename, e))?;

        stylesheet
            .minify(MinifyOptions::default())
            .map_err(|e| anyhow!("Failed to minify CSS in {}: {:?}", filename, e))?;

        let result = stylesheet
            .to_css(PrinterOptions {
                minify: true,
                ..Default::default()
            })
            .map_err(|e| anyhow!("Failed to print CSS in {}: {:?}", filename, e))?;

        Ok(result.code)
    }
}

impl Optimizer for CssOptimizer {
    fn name(&self) -> &str {
        "css"
    }

    fn optimize(
        &self,
        bundle: &Bundle,
        packaged: PackagedBundle,
        options: &BuildOptions,
    ) -> Result<PackagedBundle> {
        if !options.minify {
            return Ok(packaged);
        }

        let code = Self::minify(&bundle.display_name(), packaged.contents.as_str()?)?;
        Ok(PackagedBundle {
            contents: code.into(),
            map: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_js_comments_and_whitespace() {
        let code = "// header\nvar a = 1;   /* inline */ var b = \"//not a comment\";\n\n\n  return a\n";
        assert_eq!(
            JsOptimizer::minify(code),
            "var a = 1; var b = \"//not a comment\";\nreturn a"
        );
    }

    #[test]
    fn test_js_regex_literals_survive() {
        let code = "var s = url.replace(/[^/]*$/, \"\");\nvar abs = /^([a-z]+:)?\\/\\//i.test(url);\nvar half = total / 2;";
        assert_eq!(JsOptimizer::minify(code), code);
    }

    #[test]
    fn test_js_minify_is_idempotent() {
        let code = "function f() {\n  // one\n  return 1; /* two\n */ }\n\n  f()  ;\n";
        let once = JsOptimizer::minify(code);
        assert_eq!(JsOptimizer::minify(&once), once);
    }

    #[test]
    fn test_css_minify_keeps_selectors() {
        let once = CssOptimizer::minify("a.css", ".index {\n  color: red;\n}\n\n.local_module__foo {\n  width: 1.5em;\n}\n").unwrap();
        assert!(once.contains(".index{color:red}"));
        assert!(once.contains(".local_module__foo{width:1.5em}"));
        assert_eq!(CssOptimizer::minify("a.css", &once).unwrap(), once);
    }
}
