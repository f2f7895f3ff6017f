//! Script post-processing: syntax down-levelling and minification.

use anyhow::{Result, anyhow, bail};
use oxc::{
    allocator::Allocator,
    codegen::{Codegen, CodegenOptions, CommentOptions},
    mangler::MangleOptions,
    minifier::{CompressOptions, Minifier, MinifierOptions},
    parser::Parser,
    semantic::SemanticBuilder,
    span::SourceType,
    transformer::{TransformOptions, Transformer},
};
use std::path::Path;

/// Down-level `source` to `target` (e.g. `es2015`), then optionally minify.
pub fn transpile(source: &str, path: &Path, target: &str, minify: bool) -> Result<String> {
    let allocator = Allocator::default();
    let source_type = SourceType::from_path(path).unwrap_or_else(|_| SourceType::mjs());

    let ret = Parser::new(&allocator, source, source_type).parse();
    if !ret.errors.is_empty() {
        let first = ret.errors.iter().map(|e| e.to_string()).next();
        bail!(
            "{}: {}",
            path.display(),
            first.unwrap_or_else(|| "parse error".into())
        );
    }
    let mut program = ret.program;

    let options =
        TransformOptions::from_target(target).map_err(|e| anyhow!("js_target `{target}`: {e:?}"))?;
    let scoping = SemanticBuilder::new()
        .build(&program)
        .semantic
        .into_scoping();
    let ret = Transformer::new(&allocator, path, &options).build_with_scoping(scoping, &mut program);
    if let Some(err) = ret.errors.first() {
        bail!("{}: {err}", path.display());
    }

    let codegen = if minify {
        let options = MinifierOptions {
            mangle: Some(MangleOptions::default()),
            compress: Some(CompressOptions::smallest()),
        };
        let ret = Minifier::new(options).minify(&allocator, &mut program);
        Codegen::new()
            .with_options(CodegenOptions {
                minify: true,
                comments: CommentOptions::disabled(),
                ..CodegenOptions::default()
            })
            .with_scoping(ret.scoping)
    } else {
        Codegen::new()
    };

    Ok(codegen.build(&program).code)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "\
function greet(person) {
    const name = person?.name ?? 'stranger';
    return 'Hello ' + name;
}
console.log(greet({ name: 'Ada' }));
";

    #[test]
    fn test_downlevel_removes_modern_operators() {
        let out = transpile(SOURCE, Path::new("app.js"), "es2015", false).unwrap();
        assert!(!out.contains("??"));
        assert!(!out.contains("?."));
        assert!(out.contains("greet"));
    }

    #[test]
    fn test_minify_is_smaller() {
        let pretty = transpile(SOURCE, Path::new("app.js"), "es2015", false).unwrap();
        let compact = transpile(SOURCE, Path::new("app.js"), "es2015", true).unwrap();

        assert!(compact.len() < pretty.len());
        assert!(!compact.contains("\n    "));
    }

    #[test]
    fn test_syntax_error_names_file() {
        let err = transpile("let = ;", Path::new("broken.js"), "es2015", false).unwrap_err();
        assert!(err.to_string().contains("broken.js"));
    }

    #[test]
    fn test_unknown_target() {
        assert!(transpile(SOURCE, Path::new("app.js"), "es1999", false).is_err());
    }
}
