//! Argument and artifact path templates
//!
//! Templates use `{name}` placeholders resolved against a typed context.
//! `{{` and `}}` produce literal braces. Unknown or unavailable placeholders
//! are errors rather than being passed through.

use std::path::{Path, PathBuf};

use crate::common::config::Config;
use crate::common::{Error, Result};

/// Values available to suite templates
#[derive(Debug, Clone)]
pub struct TemplateContext {
    /// Scratch directory of the current suite invocation (absent when listing)
    pub temp_dir: Option<PathBuf>,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub results_dir: PathBuf,
}

impl TemplateContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temp_dir: None,
            version: config.version.clone(),
            host: config.automation.host.clone(),
            port: config.automation.port,
            results_dir: config.results_dir.clone(),
        }
    }

    /// Same context, scoped to one suite's scratch directory
    pub fn with_temp_dir(&self, temp_dir: &Path) -> Self {
        Self {
            temp_dir: Some(temp_dir.to_path_buf()),
            ..self.clone()
        }
    }

    fn lookup(&self, template: &str, name: &str) -> Result<String> {
        match name {
            "temp_dir" => self
                .temp_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .ok_or_else(|| Error::template(template, "{temp_dir} is only available when running")),
            "version" => Ok(self.version.clone()),
            "host" => Ok(self.host.clone()),
            "port" => Ok(self.port.to_string()),
            "results_dir" => Ok(self.results_dir.display().to_string()),
            other => Err(Error::template(
                template,
                format!("unknown placeholder {{{}}}", other),
            )),
        }
    }
}

/// Resolve every placeholder in `template`
pub fn resolve(template: &str, ctx: &TemplateContext) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => return Err(Error::template(template, "unterminated placeholder")),
                    }
                }
                out.push_str(&ctx.lookup(template, name.trim())?);
            }
            '}' => return Err(Error::template(template, "unmatched '}'")),
            _ => out.push(c),
        }
    }

    Ok(out)
}

/// Resolve a list of templates
pub fn resolve_all(templates: &[String], ctx: &TemplateContext) -> Result<Vec<String>> {
    templates.iter().map(|t| resolve(t, ctx)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext {
        TemplateContext {
            temp_dir: Some(PathBuf::from("/tmp/run1")),
            version: "2.2".to_string(),
            host: "127.0.0.1".to_string(),
            port: 2828,
            results_dir: PathBuf::from("/results"),
        }
    }

    #[test]
    fn test_resolve_placeholders() {
        assert_eq!(
            resolve("--out={temp_dir}/report.json", &ctx()).unwrap(),
            "--out=/tmp/run1/report.json"
        );
        assert_eq!(
            resolve("--marionette={host}:{port}", &ctx()).unwrap(),
            "--marionette=127.0.0.1:2828"
        );
        assert_eq!(resolve("--version={version}", &ctx()).unwrap(), "--version=2.2");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(resolve("--headless", &ctx()).unwrap(), "--headless");
    }

    #[test]
    fn test_escaped_braces() {
        assert_eq!(resolve("{{literal}}", &ctx()).unwrap(), "{literal}");
    }

    #[test]
    fn test_unknown_placeholder() {
        assert!(matches!(
            resolve("{nope}", &ctx()),
            Err(Error::Template { .. })
        ));
    }

    #[test]
    fn test_unterminated_placeholder() {
        assert!(resolve("{temp_dir", &ctx()).is_err());
        assert!(resolve("a}b", &ctx()).is_err());
    }

    #[test]
    fn test_temp_dir_missing_when_listing() {
        let mut c = ctx();
        c.temp_dir = None;
        assert!(resolve("{temp_dir}/x", &c).is_err());
        assert_eq!(resolve("{version}", &c).unwrap(), "2.2");
    }

    #[test]
    fn test_with_temp_dir() {
        let base = TemplateContext::from_config(&Config::default());
        let scoped = base.with_temp_dir(Path::new("/scratch"));
        assert_eq!(resolve("{temp_dir}", &scoped).unwrap(), "/scratch");
    }
}
