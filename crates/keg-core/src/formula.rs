//! Homebrew formula rendering.
//!
//! Turns a descriptor into an equivalent Ruby formula, so the same release
//! can be published to a tap. Variant selection is preserved: an
//! unconditional or `generic-source` variant becomes the top-level `url`, and
//! prebuilt variants land in `on_macos`/`on_linux` + `on_intel`/`on_arm`
//! blocks, which Homebrew lets override it.

use keg_schema::{Arch, Os, Platform};

use crate::descriptor::{PackageDescriptor, SourceVariant};
use crate::install::InstallStep;
use crate::template::{PLACEHOLDER, PLACEHOLDERS, TemplateError};

/// Homebrew class name for a package: `brew-up` -> `BrewUp`, `foo@2` -> `FooAT2`,
/// `libc++` -> `Libcxx`.
pub fn class_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;

    for c in name.chars() {
        match c {
            '-' | '_' | '.' => upper = true,
            '@' => {
                out.push_str("AT");
                upper = true;
            }
            '+' => {
                out.push('x');
                upper = false;
            }
            c if upper => {
                out.extend(c.to_uppercase());
                upper = false;
            }
            c => out.push(c),
        }
    }
    out
}

/// Renders descriptors as Ruby formulae.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormulaRenderer;

impl FormulaRenderer {
    /// Render `descriptor` as a formula.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] if a step uses an unknown placeholder.
    #[allow(clippy::format_push_string)]
    pub fn render(&self, descriptor: &PackageDescriptor) -> Result<String, TemplateError> {
        let info = &descriptor.package;
        let mut formula = format!(
            "class {} < Formula\n  desc \"{}\"\n  homepage \"{}\"\n",
            class_name(&info.name),
            ruby_escape(&info.description),
            ruby_escape(&info.homepage),
        );

        let fallback = descriptor
            .sources
            .iter()
            .find(|s| s.platform.is_none_or(|p| p.is_source()));
        if let Some(source) = fallback {
            formula.push_str(&format!(
                "  url \"{}\"\n  sha256 \"{}\"\n",
                ruby_escape(&source.url),
                ruby_escape(source.sha256.as_str())
            ));
        }

        formula.push_str(&format!("  version \"{}\"\n", ruby_escape(&info.version)));
        if !info.license.is_empty() {
            formula.push_str(&format!("  license \"{}\"\n", ruby_escape(&info.license)));
        }

        if let Some(dep) = fallback.and_then(|s| s.build_dep.as_deref()) {
            formula.push_str(&format!("\n  depends_on \"{}\" => :build\n", ruby_escape(dep)));
        }

        for (os, os_block) in [(Os::MacOs, "on_macos"), (Os::Linux, "on_linux")] {
            let blocks: Vec<(&str, &SourceVariant)> = [(Arch::X86_64, "on_intel"), (Arch::Arm64, "on_arm")]
                .into_iter()
                .filter_map(|(arch, arch_block)| {
                    let platform = Platform::new(os, arch);
                    // Only the first match on each platform is ever selected.
                    descriptor
                        .sources
                        .iter()
                        .find(|s| s.matches(platform))
                        .filter(|s| s.platform.and_then(|p| p.target()) == Some(platform))
                        .map(|s| (arch_block, s))
                })
                .collect();

            if blocks.is_empty() {
                continue;
            }

            formula.push_str(&format!("\n  {os_block} do\n"));
            for (arch_block, source) in blocks {
                formula.push_str(&format!(
                    "    {arch_block} do\n      url \"{}\"\n      sha256 \"{}\"\n    end\n",
                    ruby_escape(&source.url),
                    ruby_escape(source.sha256.as_str())
                ));
            }
            formula.push_str("  end\n");
        }

        formula.push_str("\n  def install\n");
        for step in descriptor.install_steps() {
            formula.push_str(&format!("    {}\n", ruby_step(step)?));
        }
        formula.push_str("  end\n");

        if !descriptor.test_steps().is_empty() {
            formula.push_str("\n  test do\n");
            for step in descriptor.test_steps() {
                formula.push_str(&format!("    {}\n", ruby_step(step)?));
            }
            formula.push_str("  end\n");
        }

        formula.push_str("end\n");
        Ok(formula)
    }
}

fn ruby_step(step: &str) -> Result<String, TemplateError> {
    if let InstallStep::BinInstall(files) = InstallStep::parse(step) {
        let args = files
            .iter()
            .map(|f| ruby_string(f, step))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(format!("bin.install {}", args.join(", ")));
    }

    let trimmed = step.trim();
    if trimmed.contains(|c: char| "|&;<>()$`\\\"'*?[]#~=%\n".contains(c)) {
        return Ok(format!("system \"/bin/sh\", \"-c\", {}", ruby_string(trimmed, step)?));
    }

    let args = trimmed
        .split_whitespace()
        .map(|word| {
            if PLACEHOLDER
                .captures(word)
                .is_some_and(|c| c.get(0).is_some_and(|m| m.as_str() == word) && &c[1] == "std_cargo_args")
            {
                Ok("*std_cargo_args".to_string())
            } else {
                ruby_string(word, step)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("system {}", args.join(", ")))
}

/// A double-quoted Ruby string with placeholders turned into interpolation.
fn ruby_string(text: &str, step: &str) -> Result<String, TemplateError> {
    let mut out = String::from("\"");
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(text) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let key = key.as_str();
        if !PLACEHOLDERS.contains(&key) {
            return Err(TemplateError {
                placeholder: key.to_string(),
                step: step.to_string(),
            });
        }
        out.push_str(&ruby_escape(&text[last..whole.start()]));
        if key == "std_cargo_args" {
            out.push_str("#{std_cargo_args.join(\" \")}");
        } else {
            out.push_str(&format!("#{{{key}}}"));
        }
        last = whole.end();
    }

    out.push_str(&ruby_escape(&text[last..]));
    out.push('"');
    Ok(out)
}

fn ruby_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '#' if matches!(chars.peek(), Some('{' | '$' | '@')) => out.push_str("\\#"),
            c => out.push(c),
        }
    }
    out
}
