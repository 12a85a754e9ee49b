mod error;
pub mod graph;
pub mod ir;
pub mod lower;
pub mod render;

use std::path::Path;

pub use error::{Error, ValidationError, ValidationErrorKind};
pub use graph::{DataflowGraph, Node, OperatorKind};
pub use ir::passes::PassOptions;
pub use ir::{Function, LoopInfo, Module};
pub use lower::{LowerOptions, Stage, lower_function};

/// Parses textual IR and validates every function in it.
pub fn parse_module(input: &str) -> Result<Module, Error> {
    let module = ir::parse(input)?;

    let mut errors = vec![];
    for func in &module.functions {
        if let Err(found) = ir::validate::validate(func) {
            errors.extend(found);
        }
    }
    if !errors.is_empty() {
        return Err(errors.into());
    }
    Ok(module)
}

/// Runs the selected IR passes over every function. Returns whether any
/// function changed.
pub fn optimize_module(module: &mut Module, passes: PassOptions) -> bool {
    let mut changed = false;
    for func in &mut module.functions {
        changed |= ir::passes::run(func, passes);
    }
    changed
}

/// The functions named by `name`, or all of them.
pub fn select_functions<'m>(
    module: &'m Module,
    name: Option<&str>,
) -> Result<Vec<&'m Function>, Error> {
    match name {
        Some(name) => module
            .function(name)
            .map(|func| vec![func])
            .ok_or_else(|| Error::UnknownFunction(name.to_string())),
        None => Ok(module.functions.iter().collect()),
    }
}

/// Lowers one function against its own loop structure.
#[must_use]
pub fn lower(func: &Function, options: &LowerOptions) -> DataflowGraph {
    let loops = LoopInfo::analyze(func);
    lower_function(func, &loops, options)
}

pub fn write_output(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), Error> {
    std::fs::write(path, contents).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn render_to_pdf(graph: &DataflowGraph, path: &Path) -> Result<(), Error> {
    let svg = render::render_to_svg(&render::to_dot(graph))?;
    render::render_svg_to_pdf(svg, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = r#"
define i32 @first(i32 %x) {
entry:
  br label %next

next:
  %y = add i32 %x, 1
  ret i32 %y
}

define void @second() {
entry:
  ret void
}
"#;

    #[test]
    fn test_parse_module_reports_validation_errors() {
        let err = parse_module("define void @f() {\nentry:\n  %x = add i32 1, 2\n}\n").unwrap_err();
        match err {
            Error::InvalidGraph(errors) => {
                assert_eq!(errors[0].kind, ValidationErrorKind::MissingTerminator);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_select_functions() {
        let module = parse_module(SRC).unwrap();
        assert_eq!(select_functions(&module, None).unwrap().len(), 2);
        assert_eq!(select_functions(&module, Some("second")).unwrap()[0].name, "second");
        assert!(matches!(
            select_functions(&module, Some("third")),
            Err(Error::UnknownFunction(name)) if name == "third"
        ));
    }

    #[test]
    fn test_optimize_then_lower() {
        let mut module = parse_module(SRC).unwrap();
        let passes = PassOptions {
            merge_blocks: true,
            ..PassOptions::default()
        };
        assert!(optimize_module(&mut module, passes));
        assert_eq!(module.functions[0].block_count(), 1);

        let graph = lower(&module.functions[0], &LowerOptions::default());
        assert_eq!(graph.nodes_of_kind(OperatorKind::FunctionOutput).len(), 1);
        assert!(graph.nodes_of_kind(OperatorKind::Unknown).is_empty());
    }
}
