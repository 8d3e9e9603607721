use crate::error::{CoreError, Result};
use tracing::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// A registered working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// 8-hex content-derived id, stable for the project's lifetime.
    pub id: String,

    /// Sanitized human name: letters, digits, dash, underscore.
    pub name: String,

    /// Absolute root path.
    pub root: PathBuf,

    /// Unix timestamp of registration.
    pub created_at: i64,

    /// At most one project is active at a time.
    pub active: bool,
}

#[derive(Serialize, Deserialize, Default)]
struct RegistryFile {
    projects: Vec<Project>,
}

/// Process-wide store of project records.
///
/// One lock covers both the in-memory list and the backing file; every
/// mutation rewrites `projects.json` atomically before returning.
pub struct ProjectRegistry {
    path: PathBuf,
    inner: Mutex<Vec<Project>>,
}

impl ProjectRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let projects = if path.exists() {
            let data = fs::read_to_string(path)?;
            let file: RegistryFile = serde_json::from_str(&data)
                .map_err(|e| CoreError::Corrupt(format!("unreadable registry: {e}")))?;
            file.projects
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(projects),
        })
    }

    /// Register a working tree. A duplicate path returns the existing record
    /// unchanged; a name collision on a different path is `AlreadyExists`.
    pub fn add(&self, name: Option<&str>, root: &Path) -> Result<Project> {
        let root = root
            .canonicalize()
            .map_err(|_| CoreError::NotFound(format!("no such directory: {}", root.display())))?;
        if !root.is_dir() {
            return Err(CoreError::NotFound(format!(
                "not a directory: {}",
                root.display()
            )));
        }

        let mut projects = self.lock();

        if let Some(existing) = projects.iter().find(|p| p.root == root) {
            return Ok(existing.clone());
        }

        let name = match name {
            Some(name) if !name.is_empty() && name != "auto" => sanitize_name(name),
            _ => sanitize_name(
                root.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "project".to_string())
                    .as_str(),
            ),
        };
        if projects.iter().any(|p| p.name == name) {
            return Err(CoreError::AlreadyExists(format!(
                "project name '{name}' is taken"
            )));
        }

        let created_at = unix_now();
        let project = Project {
            id: derive_id(&root, created_at),
            name,
            root,
            created_at,
            active: projects.is_empty(),
        };
        projects.push(project.clone());
        self.persist(&projects)?;
        info!("registered project '{}' ({})", project.name, project.id);
        Ok(project)
    }

    /// Resolve a selector to a project.
    ///
    /// "auto" (or empty) first tries a longest-prefix match of the caller's
    /// working directory against registered roots, then the active flag.
    /// Otherwise the selector is matched as exact name, exact id, then path.
    pub fn resolve(&self, selector: &str, working_dir: Option<&Path>) -> Result<Project> {
        let projects = self.lock();

        if selector.is_empty() || selector == "auto" {
            if let Some(dir) = working_dir {
                let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
                let mut best: Option<&Project> = None;
                for project in projects.iter() {
                    if dir.starts_with(&project.root) {
                        let deeper = best
                            .map(|b| project.root.components().count() > b.root.components().count())
                            .unwrap_or(true);
                        if deeper {
                            best = Some(project);
                        }
                    }
                }
                if let Some(found) = best {
                    return Ok(found.clone());
                }
            }
            return projects
                .iter()
                .find(|p| p.active)
                .cloned()
                .ok_or_else(|| CoreError::NotFound("no active project".to_string()));
        }

        if let Some(found) = projects.iter().find(|p| p.name == selector) {
            return Ok(found.clone());
        }
        if let Some(found) = projects.iter().find(|p| p.id == selector) {
            return Ok(found.clone());
        }
        let as_path = Path::new(selector);
        if let Ok(canonical) = as_path.canonicalize() {
            if let Some(found) = projects.iter().find(|p| p.root == canonical) {
                return Ok(found.clone());
            }
        }
        Err(CoreError::NotFound(format!("no such project: {selector}")))
    }

    /// Flag exactly one project active.
    pub fn activate(&self, selector: &str) -> Result<Project> {
        let target = self.resolve(selector, None)?;
        let mut projects = self.lock();
        for project in projects.iter_mut() {
            project.active = project.id == target.id;
        }
        self.persist(&projects)?;
        info!("activated project '{}'", target.name);
        Ok(self
            .find_by_id(&projects, &target.id)
            .expect("activated project must exist"))
    }

    /// Drop a record. The caller is responsible for purging derived indexes.
    pub fn remove(&self, selector: &str) -> Result<Project> {
        let target = self.resolve(selector, None)?;
        let mut projects = self.lock();
        projects.retain(|p| p.id != target.id);
        // Keep exactly one active project when any remain.
        if target.active {
            if let Some(first) = projects.first_mut() {
                first.active = true;
            }
        }
        self.persist(&projects)?;
        info!("removed project '{}' ({})", target.name, target.id);
        Ok(target)
    }

    pub fn list(&self) -> Vec<Project> {
        self.lock().clone()
    }

    fn find_by_id(&self, projects: &[Project], id: &str) -> Option<Project> {
        projects.iter().find(|p| p.id == id).cloned()
    }

    fn persist(&self, projects: &[Project]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = RegistryFile {
            projects: projects.to_vec(),
        };
        let data = serde_json::to_string_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Project>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Keep letters, digits, dash, underscore; anything else becomes a dash.
fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "project".to_string()
    } else {
        trimmed.to_string()
    }
}

/// 8-hex id from the root path and creation timestamp.
fn derive_id(root: &Path, created_at: i64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(root.to_string_lossy().as_bytes());
    hasher.update(&created_at.to_le_bytes());
    let digest = hasher.finalize();
    digest.to_hex()[..8].to_string()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Fixture {
        data: TempDir,
        trees: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                data: TempDir::new().unwrap(),
                trees: TempDir::new().unwrap(),
            }
        }

        fn registry(&self) -> ProjectRegistry {
            ProjectRegistry::load(&self.data.path().join("projects.json")).unwrap()
        }

        fn tree(&self, name: &str) -> PathBuf {
            let path = self.trees.path().join(name);
            fs::create_dir_all(&path).unwrap();
            path
        }
    }

    #[test]
    fn add_derives_id_and_activates_first_project() {
        let fixture = Fixture::new();
        let registry = fixture.registry();
        let root = fixture.tree("myproj");

        let project = registry.add(None, &root).unwrap();
        assert_eq!(project.id.len(), 8);
        assert!(project.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(project.name, "myproj");
        assert!(project.active);

        let second = registry.add(None, &fixture.tree("other")).unwrap();
        assert!(!second.active);
    }

    #[test]
    fn duplicate_path_returns_existing_record() {
        let fixture = Fixture::new();
        let registry = fixture.registry();
        let root = fixture.tree("proj");

        let first = registry.add(Some("proj"), &root).unwrap();
        let again = registry.add(Some("different-name"), &root).unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn name_collision_on_different_path_is_rejected() {
        let fixture = Fixture::new();
        let registry = fixture.registry();
        registry.add(Some("shared"), &fixture.tree("a")).unwrap();

        let err = registry.add(Some("shared"), &fixture.tree("b"));
        assert!(matches!(err, Err(CoreError::AlreadyExists(_))));
    }

    #[test]
    fn names_are_sanitized() {
        let fixture = Fixture::new();
        let registry = fixture.registry();
        let project = registry
            .add(Some("my cool/project!"), &fixture.tree("x"))
            .unwrap();
        assert_eq!(project.name, "my-cool-project");
    }

    #[test]
    fn resolve_by_name_id_and_path() {
        let fixture = Fixture::new();
        let registry = fixture.registry();
        let root = fixture.tree("resolver");
        let project = registry.add(None, &root).unwrap();

        assert_eq!(registry.resolve("resolver", None).unwrap().id, project.id);
        assert_eq!(registry.resolve(&project.id, None).unwrap().id, project.id);
        assert_eq!(
            registry
                .resolve(root.to_str().unwrap(), None)
                .unwrap()
                .id,
            project.id
        );
        assert!(matches!(
            registry.resolve("missing", None),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn auto_resolution_prefers_longest_prefix_match() {
        let fixture = Fixture::new();
        let registry = fixture.registry();
        let outer = fixture.tree("outer");
        let inner = outer.join("nested");
        fs::create_dir_all(&inner).unwrap();

        registry.add(Some("outer"), &outer).unwrap();
        let inner_project = registry.add(Some("inner"), &inner).unwrap();

        let sub = inner.join("src");
        fs::create_dir_all(&sub).unwrap();
        let resolved = registry.resolve("auto", Some(&sub)).unwrap();
        assert_eq!(resolved.id, inner_project.id);
    }

    #[test]
    fn auto_without_match_falls_back_to_active() {
        let fixture = Fixture::new();
        let registry = fixture.registry();
        let project = registry.add(None, &fixture.tree("only")).unwrap();

        let elsewhere = fixture.tree("unrelated");
        let resolved = registry.resolve("auto", Some(&elsewhere)).unwrap();
        assert_eq!(resolved.id, project.id);
    }

    #[test]
    fn activate_flips_exactly_one_flag() {
        let fixture = Fixture::new();
        let registry = fixture.registry();
        registry.add(Some("a"), &fixture.tree("a")).unwrap();
        registry.add(Some("b"), &fixture.tree("b")).unwrap();

        registry.activate("b").unwrap();
        let projects = registry.list();
        let active: Vec<&str> = projects
            .iter()
            .filter(|p| p.active)
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(active, vec!["b"]);
    }

    #[test]
    fn remove_reassigns_the_active_flag() {
        let fixture = Fixture::new();
        let registry = fixture.registry();
        registry.add(Some("a"), &fixture.tree("a")).unwrap();
        registry.add(Some("b"), &fixture.tree("b")).unwrap();

        registry.remove("a").unwrap();
        let projects = registry.list();
        assert_eq!(projects.len(), 1);
        assert!(projects[0].active);
    }

    #[test]
    fn registry_persists_across_loads() {
        let fixture = Fixture::new();
        let path = fixture.data.path().join("projects.json");
        {
            let registry = ProjectRegistry::load(&path).unwrap();
            registry.add(Some("kept"), &fixture.tree("kept")).unwrap();
        }
        let registry = ProjectRegistry::load(&path).unwrap();
        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.list()[0].name, "kept");
    }
}
