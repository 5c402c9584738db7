use rvequiv::instruction::Instruction;
use rvequiv::parser::parse_program;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Once,
};
use tempfile::{tempdir, TempDir};

static INIT_LOGGER: Once = Once::new();

pub fn init() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Parses a program and resolves its labels, ready for modeling.
#[allow(dead_code)]
pub fn program(source: &str) -> Vec<Instruction> {
    parse_program(source)
        .expect("test program parses")
        .resolve_labels()
}

#[allow(dead_code)]
pub fn with_temp_dir<F, R>(f: F) -> R
where
    F: FnOnce(&TempDir) -> R,
{
    let temp_dir = tempdir().unwrap();

    f(&temp_dir)
}

#[allow(dead_code)]
pub fn write_program(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, source).unwrap();
    path
}
