use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Arg(String, Option<String>),
    From {
        image: String,
        alias: Option<String>,
    },
    Other(String),
}

/// Joins `\` continuations, drops comments and blank lines
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for raw in content.lines() {
        let line = raw.trim();
        if current.is_empty() && (line.is_empty() || line.starts_with('#')) {
            continue;
        }
        if let Some(stripped) = line.strip_suffix('\\') {
            current.push_str(stripped.trim_end());
            current.push(' ');
            continue;
        }
        current.push_str(line);
        lines.push(std::mem::take(&mut current));
    }
    if !current.trim().is_empty() {
        lines.push(current.trim().to_string());
    }
    lines
}

pub fn parse_dockerfile(content: &str) -> Vec<Instruction> {
    let mut instructions = Vec::new();

    for line in logical_lines(content) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        let keyword = parts[0].to_uppercase();
        match keyword.as_str() {
            "FROM" => {
                // FROM [--platform=<p>] <image> [AS <name>]
                let operands: Vec<&str> = parts[1..]
                    .iter()
                    .copied()
                    .filter(|p| !p.starts_with("--"))
                    .collect();
                if let Some(image) = operands.first() {
                    let alias = match operands.get(1) {
                        Some(kw) if kw.eq_ignore_ascii_case("as") => {
                            operands.get(2).map(|a| a.to_lowercase())
                        }
                        _ => None,
                    };
                    instructions.push(Instruction::From {
                        image: image.to_string(),
                        alias,
                    });
                }
            }
            "ARG" => {
                for decl in &parts[1..] {
                    match decl.split_once('=') {
                        Some((name, value)) => instructions.push(Instruction::Arg(
                            name.to_string(),
                            Some(value.trim_matches('"').to_string()),
                        )),
                        None => instructions.push(Instruction::Arg(decl.to_string(), None)),
                    }
                }
            }
            _ => {
                instructions.push(Instruction::Other(line.to_string()));
            }
        }
    }

    instructions
}

fn arg_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("invalid ARG reference pattern")
    })
}

/// Expand `$NAME`, `${NAME}` and `${NAME:-default}` against `args`; unknown names become empty
pub fn expand_args(value: &str, args: &HashMap<String, String>) -> String {
    arg_reference()
        .replace_all(value, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match args.get(name) {
                Some(v) if !v.is_empty() => v.clone(),
                _ => caps
                    .get(2)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            }
        })
        .into_owned()
}

/// One `FROM` block of a multi-stage Dockerfile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Image reference after ARG expansion
    pub base: String,
    pub alias: Option<String>,
}

/// Stages in declaration order, with meta ARGs (those before the first FROM) expanded.
///
/// `build_args` are `KEY=VALUE` strings as passed to the builder; they override ARG defaults.
pub fn parse_stages(content: &str, build_args: &[String]) -> Vec<Stage> {
    let overrides: HashMap<&str, &str> = build_args
        .iter()
        .filter_map(|a| a.split_once('='))
        .collect();

    let mut meta_args: HashMap<String, String> = HashMap::new();
    let mut stages = Vec::new();

    for instruction in parse_dockerfile(content) {
        match instruction {
            Instruction::Arg(name, default) if stages.is_empty() => {
                let value = overrides
                    .get(name.as_str())
                    .map(|v| v.to_string())
                    .or(default)
                    .unwrap_or_default();
                meta_args.insert(name, value);
            }
            Instruction::From { image, alias } => stages.push(Stage {
                base: expand_args(&image, &meta_args),
                alias,
            }),
            _ => {}
        }
    }
    stages
}

/// External image the final stage ultimately derives from, following stage-name references.
///
/// `None` for an empty Dockerfile or when the chain ends at `scratch`.
pub fn final_base_image(stages: &[Stage]) -> Option<String> {
    let mut idx = stages.len().checked_sub(1)?;

    // Each hop must point at an earlier stage, so the chain is bounded by the stage count
    for _ in 0..stages.len() {
        let base = stages[idx].base.as_str();
        let lowered = base.to_lowercase();
        let earlier = stages[..idx]
            .iter()
            .rposition(|s| s.alias.as_deref() == Some(lowered.as_str()));
        match earlier {
            Some(prev) => idx = prev,
            None if lowered == "scratch" => return None,
            None => return Some(base.to_string()),
        }
    }
    None
}
