mod compiler;

pub use compiler::UpdateCompiler;
