//! Persona directory loading: one `*.json` profile per file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use deliberation::persona::MEDIATOR_ID;
use deliberation::PersonaProfile;
use tracing::debug;

use crate::error::LoadError;

/// Load every `*.json` profile in `dir`, ordered by file name.
pub fn load_personas(dir: &Path) -> Result<Vec<PersonaProfile>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read persona directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("json"))
        })
        .collect();
    files.sort();

    let mut personas = Vec::with_capacity(files.len());
    let mut names = HashSet::new();
    for path in files {
        let persona = load_persona(&path)?;
        if !names.insert(persona.name.to_lowercase()) {
            return Err(LoadError::DuplicatePersona(persona.name).into());
        }
        debug!(name = %persona.name, path = %path.display(), "persona loaded");
        personas.push(persona);
    }

    if personas.is_empty() {
        return Err(LoadError::Empty {
            what: "personas",
            path: dir.to_path_buf(),
        }
        .into());
    }
    Ok(personas)
}

fn load_persona(path: &Path) -> Result<PersonaProfile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read persona {}", path.display()))?;
    let mut persona: PersonaProfile = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse persona {}", path.display()))?;
    persona.name = persona.name.trim().to_string();
    if persona.name.is_empty() {
        return Err(LoadError::UnnamedPersona(path.to_path_buf()).into());
    }
    if persona.name.eq_ignore_ascii_case(MEDIATOR_ID) {
        return Err(LoadError::ReservedPersona(persona.name).into());
    }
    Ok(persona)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, file: &str, body: &str) {
        std::fs::write(dir.join(file), body).unwrap();
    }

    #[test]
    fn test_loads_json_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "b.json",
            r#"{"name": "Bo", "role_description": "a rural clinician", "purpose": "keep it usable"}"#,
        );
        write(dir.path(), "a.json", r#"{"name": " Ada ", "role_description": "an engineer"}"#);
        write(dir.path(), "notes.txt", "not a persona");

        let personas = load_personas(dir.path()).unwrap();
        let names: Vec<&str> = personas.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Ada", "Bo"]);
        assert_eq!(personas[1].purpose, "keep it usable");
        assert!(personas[0].failure_mode.is_empty());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.json", r#"{"name": "Ada", "role_description": "x"}"#);
        write(dir.path(), "b.json", r#"{"name": "ada", "role_description": "y"}"#);
        let err = load_personas(dir.path()).unwrap_err();
        assert!(matches!(err.downcast_ref::<LoadError>(), Some(LoadError::DuplicatePersona(_))));
    }

    #[test]
    fn test_mediator_name_is_reserved() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.json", r#"{"name": "Ada", "role_description": "x"}"#);
        write(dir.path(), "m.json", r#"{"name": "mediator", "role_description": "y"}"#);
        let err = load_personas(dir.path()).unwrap_err();
        assert!(matches!(err.downcast_ref::<LoadError>(), Some(LoadError::ReservedPersona(_))));
    }

    #[test]
    fn test_empty_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_personas(dir.path()).unwrap_err();
        assert!(matches!(err.downcast_ref::<LoadError>(), Some(LoadError::Empty { .. })));
    }

    #[test]
    fn test_malformed_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken.json", "{ nope");
        let err = load_personas(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"));
    }
}
