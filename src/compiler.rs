//! Compiler-family parameters: what distinguishes a binary language (gcc,
//! g++) from a bytecode language (compiles to an intermediate artifact run
//! through an interpreter) from a script language (no compile step) is
//! just three pieces of data - a target filename, a run command, and
//! whether a compiler needs to be invoked at all. `gulag.runner` expresses
//! this as `BinaryMixin`/`BytecodeMixin`/`ScriptMixin` classes layered onto
//! `Runner` via multiple inheritance; per spec.md's design notes that
//! becomes a flat enum here, in the same style [`crate::supervisor`]'s
//! `DescriptorKind` already uses for its own small, closed set of variants.

use std::path::PathBuf;

/// The fixed parameters of one compiled-language family.
#[derive(Clone, Debug)]
pub enum CompilerFamily {
    /// `gcc`/`g++`-style: compiles straight to an executable file named
    /// [`BINARY_EXECUTABLE`]. Mirrors `gulag.runner.BinaryMixin` /
    /// `gulag.gcc.GCCMixin` / `GXXMixin`.
    Binary { compiler: String },
    /// Compiles to `<source-stem>.<bytecode_ext>`, then run by invoking
    /// `interpreter` against that artifact. `gulag.runner.BytecodeMixin`
    /// fixes `target_filename` but leaves `EXECUTABLE_PATH`/`run_args` to
    /// the concrete subclass (e.g. a Java or Python-bytecode family); this
    /// folds both into one variant.
    Bytecode {
        compiler: String,
        bytecode_ext: String,
        interpreter: String,
    },
    /// No compiler is invoked; the source file itself is the run target,
    /// relabeled straight to the run-level. Mirrors
    /// `gulag.runner.ScriptMixin`.
    Script { interpreter: String },
}

/// The filename `BinaryMixin` compiles to (`a.out` in the original).
pub const BINARY_EXECUTABLE: &str = "a.out";

impl CompilerFamily {
    /// True if [`Runner::compile`](crate::runner::Runner::compile) must
    /// actually spawn a compiler; false for [`CompilerFamily::Script`].
    pub fn needs_compile(&self) -> bool {
        !matches!(self, CompilerFamily::Script { .. })
    }

    /// The external compiler binary to resolve via [`crate::which::which`],
    /// or `None` for a script family with nothing to compile.
    pub fn compiler_name(&self) -> Option<&str> {
        match self {
            CompilerFamily::Binary { compiler } => Some(compiler),
            CompilerFamily::Bytecode { compiler, .. } => Some(compiler),
            CompilerFamily::Script { .. } => None,
        }
    }

    /// The filename the compile step is expected to produce inside the
    /// sandbox directory, relative to the source's own filename.
    pub fn target_filename(&self, source_filename: &str) -> String {
        match self {
            CompilerFamily::Binary { .. } => BINARY_EXECUTABLE.to_string(),
            CompilerFamily::Bytecode { bytecode_ext, .. } => {
                let stem = PathBuf::from(source_filename)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| source_filename.to_string());
                format!("{}.{}", stem, bytecode_ext)
            }
            CompilerFamily::Script { .. } => source_filename.to_string(),
        }
    }

    /// The executable to pass to [`crate::supervisor::spawn_and_run`] for
    /// the run phase - relative to the sandbox directory, which is always
    /// the child's cwd.
    pub fn run_executable(&self, source_filename: &str) -> PathBuf {
        match self {
            CompilerFamily::Binary { .. } => PathBuf::from(BINARY_EXECUTABLE),
            CompilerFamily::Bytecode { interpreter, .. } => PathBuf::from(interpreter),
            CompilerFamily::Script { interpreter } => PathBuf::from(interpreter),
        }
    }

    /// `argv` for the run phase, `argv[0]` included.
    pub fn run_args(&self, source_filename: &str) -> Vec<String> {
        match self {
            CompilerFamily::Binary { .. } => vec![BINARY_EXECUTABLE.to_string()],
            CompilerFamily::Bytecode { interpreter, .. } => {
                vec![interpreter.clone(), self.target_filename(source_filename)]
            }
            CompilerFamily::Script { interpreter } => {
                vec![interpreter.clone(), source_filename.to_string()]
            }
        }
    }

    /// `argv` for the compile phase, `argv[0]` excluded - the compiler's
    /// own flags plus the source filename, mirroring
    /// `CompilerMixin.compile`'s `[self.COMPILER] + args + [self._filename]`.
    pub fn compile_args(&self, extra_args: &[String], source_filename: &str) -> Vec<String> {
        let mut argv = extra_args.to_vec();
        argv.push(source_filename.to_string());
        argv
    }
}

/// Convenience constructor mirroring `gulag.gcc.GCCMixin`.
pub fn gcc() -> CompilerFamily {
    CompilerFamily::Binary {
        compiler: "gcc".to_string(),
    }
}

/// Convenience constructor mirroring `gulag.gcc.GXXMixin`.
pub fn gxx() -> CompilerFamily {
    CompilerFamily::Binary {
        compiler: "g++".to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn binary_family_targets_a_out() {
        let family = gcc();
        assert_eq!(family.target_filename("sol.c"), "a.out");
        assert_eq!(family.run_args("sol.c"), vec!["a.out".to_string()]);
        assert!(family.needs_compile());
    }

    #[test]
    fn bytecode_family_targets_stem_with_extension() {
        let family = CompilerFamily::Bytecode {
            compiler: "javac".to_string(),
            bytecode_ext: "class".to_string(),
            interpreter: "java".to_string(),
        };
        assert_eq!(family.target_filename("Main.java"), "Main.class");
        assert_eq!(
            family.run_args("Main.java"),
            vec!["java".to_string(), "Main.class".to_string()]
        );
    }

    #[test]
    fn script_family_needs_no_compile() {
        let family = CompilerFamily::Script {
            interpreter: "python3".to_string(),
        };
        assert!(!family.needs_compile());
        assert_eq!(family.compiler_name(), None);
        assert_eq!(family.target_filename("sol.py"), "sol.py");
        assert_eq!(
            family.run_args("sol.py"),
            vec!["python3".to_string(), "sol.py".to_string()]
        );
    }

    #[test]
    fn compile_args_append_source_filename_after_flags() {
        let family = gcc();
        let args = family.compile_args(&["-O2".to_string(), "-o".to_string(), "a.out".to_string()], "sol.c");
        assert_eq!(args, vec!["-O2", "-o", "a.out", "sol.c"]);
    }
}
