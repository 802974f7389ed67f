//! Loading a mapping set from a root file.
//!
//! The root is either a mappings document or a main document that includes
//! other mapping files:
//!
//! ```json
//! {"@type": "main", "@include": {"mappings": ["users.json", "api/*.json"]}}
//! ```

use super::compiler::compile_mappings;
use super::{Mapping, MappingSet};
use crate::directive::Context;
use crate::error::CompileError;
use crate::json::{JsonPath, Object, Segment, Value};
use crate::source::{FileSource, FsSource};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Root file names tried, in order, when none is configured.
pub const DEFAULT_MAPFILES: [&str; 3] = ["mappings.json", "mappings.main.json", "main.json"];

/// Compiles a [`MappingSet`] from a root file. Cheap to clone; every
/// [`load`](Loader::load) is a fresh compile pass.
#[derive(Clone)]
pub struct Loader {
    root: PathBuf,
    source: Arc<dyn FileSource>,
}

impl Loader {
    /// Loader over the local filesystem. The root path is canonicalized so
    /// the base directory does not depend on the working directory later.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = std::fs::canonicalize(root)?;
        Ok(Self::with_source(root, Arc::new(FsSource)))
    }

    pub fn with_source(root: impl Into<PathBuf>, source: Arc<dyn FileSource>) -> Self {
        Self {
            root: root.into(),
            source,
        }
    }

    /// First of [`DEFAULT_MAPFILES`] present in `dir`.
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        DEFAULT_MAPFILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory every file reference resolves against.
    pub fn base_dir(&self) -> &Path {
        self.root.parent().unwrap_or_else(|| Path::new("/"))
    }

    pub fn load(&self) -> Result<MappingSet, CompileError> {
        let base_dir = self.base_dir().to_path_buf();
        let mut ctx = Context::new(self.source.as_ref(), base_dir.clone());
        let root_name = ctx.relative(&self.root);

        let doc = ctx.read_document(&self.root)?;
        let mappings = match main_document(&doc) {
            Some(main) => load_main(main, &mut ctx).map_err(|e| e.in_file(&root_name))?,
            None => compile_mappings(doc, &mut ctx, &root_name)?,
        };
        let mappings = merge_mappings(mappings);

        debug!(
            root = %root_name.display(),
            mappings = mappings.len(),
            files = ctx.loaded().len(),
            "Compiled mapping set"
        );

        Ok(MappingSet {
            mappings,
            filenames: ctx.into_loaded(),
            base_dir,
        })
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader").field("root", &self.root).finish()
    }
}

fn main_document(doc: &Value) -> Option<&Object> {
    let object = doc.as_object()?;
    (object.value("@type").as_str() == Some("main")).then_some(object)
}

/// Compile every file listed under `@include.mappings`, in listed order.
/// Entries may be glob patterns; the pattern itself is recorded so that new
/// matching files are noticed on reload.
fn load_main(main: &Object, ctx: &mut Context<'_>) -> Result<Vec<Mapping>, CompileError> {
    let mut path = JsonPath::root();
    path.push(Segment::key("@include"));
    let include = main
        .get_object("@include")
        .map_err(|e| CompileError::from(e).at(&path))?;

    path.push(Segment::key("mappings"));
    let entries = include.value("mappings").clone().into_array();

    let mut mappings = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        let at = path.child(Segment::Index(idx));
        let name = entry
            .to_text("")
            .map_err(|e| CompileError::from(e).at(&at))?;
        let pattern = ctx.resolve(&name).map_err(|e| e.at(&at))?;
        ctx.record(&pattern);

        let files = ctx
            .source()
            .expand(&pattern)
            .map_err(|e| CompileError::from(e).at(&at))?;
        if files.is_empty() {
            debug!(pattern = %name, "Include pattern matched no files");
        }
        for file in files {
            let relative = ctx.relative(&file);
            let doc = ctx.read_document(&file)?;
            mappings.extend(compile_mappings(doc, ctx, &relative)?);
        }
    }
    Ok(mappings)
}

/// Merge mappings sharing URI and method, appending policies in load order.
/// The result keeps URIs in order of first appearance, with every mapping of
/// one URI adjacent.
fn merge_mappings(mappings: Vec<Mapping>) -> Vec<Mapping> {
    let mut groups: Vec<(String, Vec<Mapping>)> = Vec::new();
    for mapping in mappings {
        let idx = match groups.iter().position(|(uri, _)| *uri == mapping.uri) {
            Some(idx) => idx,
            None => {
                groups.push((mapping.uri.clone(), Vec::new()));
                groups.len() - 1
            }
        };
        let group = &mut groups[idx].1;
        match group.iter_mut().find(|m| m.method == mapping.method) {
            Some(existing) => existing.policies.extend(mapping.policies),
            None => group.push(mapping),
        }
    }
    groups.into_iter().flat_map(|(_, group)| group).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileErrorKind;
    use crate::mapping::MethodFilter;
    use crate::source::MemorySource;
    use axum::http::Method;

    fn loader(source: MemorySource, root: &str) -> Loader {
        Loader::with_source(root, Arc::new(source))
    }

    #[test]
    fn test_load_plain_mappings_file() {
        let src = MemorySource::new().with_file(
            "/base/mappings.json",
            r#"[{"uri":"/a","@comment":"first"},{"uri":"/b","method":"GET"}]"#,
        );
        let set = loader(src, "/base/mappings.json").load().unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.filenames, vec![PathBuf::from("mappings.json")]);
        assert_eq!(set.base_dir, PathBuf::from("/base"));
    }

    #[test]
    fn test_load_main_with_includes_and_globs() {
        let src = MemorySource::new()
            .with_file(
                "/base/main.json",
                r#"{"@type":"main","@include":{"mappings":["first.json","api/*.json","none/*.json"]}}"#,
            )
            .with_file("/base/first.json", r#"[{"uri":"/first"}]"#)
            .with_file("/base/api/b.json", r#"[{"uri":"/b"}]"#)
            .with_file("/base/api/a.json", r#"{"@type":"mappings","mappings":[{"uri":"/a"}]}"#)
            .with_file("/base/api/skip.txt", "ignored");

        let set = loader(src, "/base/main.json").load().unwrap();
        let uris: Vec<&str> = set.mappings.iter().map(|m| m.uri.as_str()).collect();
        assert_eq!(uris, vec!["/first", "/a", "/b"]);
        assert_eq!(
            set.filenames,
            vec![
                PathBuf::from("main.json"),
                PathBuf::from("first.json"),
                PathBuf::from("api/*.json"),
                PathBuf::from("api/a.json"),
                PathBuf::from("api/b.json"),
                PathBuf::from("none/*.json"),
            ]
        );
    }

    #[test]
    fn test_merge_same_uri_and_method() {
        let src = MemorySource::new().with_file(
            "/base/mappings.json",
            r#"[
                {"uri":"/x","method":"GET","policies":[{"returns":{"statusCode":201}}]},
                {"uri":"/y"},
                {"uri":"/x","method":"POST"},
                {"uri":"/x","method":"get","policies":[{"returns":{"statusCode":202}}]}
            ]"#,
        );
        let set = loader(src, "/base/mappings.json").load().unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.mappings[0].uri, "/x");
        assert_eq!(set.mappings[0].method, MethodFilter::Only(Method::GET));
        assert_eq!(set.mappings[0].policies.len(), 2);
        assert_eq!(set.mappings[1].method, MethodFilter::Only(Method::POST));
        assert_eq!(set.mappings[2].uri, "/y");
    }

    #[test]
    fn test_error_in_included_file_keeps_its_location() {
        let src = MemorySource::new()
            .with_file(
                "/base/main.json",
                r#"{"@type":"main","@include":{"mappings":["bad.json"]}}"#,
            )
            .with_file("/base/bad.json", r#"[{"uri":"/ok"},{"uri":"nope"}]"#);
        let err = loader(src, "/base/main.json").load().unwrap_err();
        assert_eq!(err.file, Some(PathBuf::from("bad.json")));
        assert_eq!(err.path.unwrap().to_string(), "$[1].uri");
    }

    #[test]
    fn test_include_errors_point_at_main() {
        let src = MemorySource::new().with_file(
            "/base/main.json",
            r#"{"@type":"main","@include":{"mappings":["ok.json","../outside.json"]}}"#,
        )
        .with_file("/base/ok.json", "[]");
        let err = loader(src, "/base/main.json").load().unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::OutsideBaseDir));
        assert_eq!(err.file, Some(PathBuf::from("main.json")));
        assert_eq!(err.path.unwrap().to_string(), "$.@include.mappings[1]");

        let src = MemorySource::new().with_file(
            "/base/main.json",
            r#"{"@type":"main","@include":{"mappings":["missing.json"]}}"#,
        );
        let err = loader(src, "/base/main.json").load().unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::Io(_)));
        assert_eq!(err.file, Some(PathBuf::from("missing.json")));
    }

    #[test]
    fn test_templates_are_tracked_for_watching() {
        let src = MemorySource::new()
            .with_file(
                "/base/mappings.json",
                r#"[{"@template":"user.json","@vars":"users.csv"}]"#,
            )
            .with_file(
                "/base/user.json",
                r#"{"@type":"template","template":{"uri":"/users/@{id}","policies":[{"returns":{"body":"@{name}"}}]}}"#,
            )
            .with_file("/base/users.csv", "id,name\n1,alice\n2,bob\n");

        let set = loader(src, "/base/mappings.json").load().unwrap();
        let uris: Vec<&str> = set.mappings.iter().map(|m| m.uri.as_str()).collect();
        assert_eq!(uris, vec!["/users/1", "/users/2"]);
        assert!(set.filenames.contains(&PathBuf::from("user.json")));
        assert!(set.filenames.contains(&PathBuf::from("users.csv")));
    }

    #[test]
    fn test_discover_and_open() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Loader::discover(dir.path()).is_none());

        std::fs::write(dir.path().join("main.json"), r#"[{"uri":"/m"}]"#).unwrap();
        std::fs::write(dir.path().join("mappings.json"), r#"[{"uri":"/first"}]"#).unwrap();
        let found = Loader::discover(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "mappings.json");

        let set = Loader::open(&found).unwrap().load().unwrap();
        assert_eq!(set.mappings[0].uri, "/first");
        assert!(Loader::open(dir.path().join("absent.json")).is_err());
    }
}
