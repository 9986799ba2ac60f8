// filter_utils.rs

use crate::error::{SyncError, SyncResult};
use crate::tag_utils::{options_for_group, Tag};
use serde::Serialize;
use serde_json::ser::{Formatter, PrettyFormatter, Serializer};
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::path::Path;

/// Filter titles whose options are driven by the tag taxonomy.
pub const TAG_CATEGORIES: &[&str] = &["Content", "Format", "Genre", "Theme"];

/// One entry of `filters.json`. Kept as a raw object so unrelated keys and
/// their order survive a rewrite untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FilterDefinition(Map<String, Value>);

impl FilterDefinition {
    pub fn title(&self) -> Option<&str> {
        self.get("title").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    fn tag_group(&self) -> Option<String> {
        self.title()
            .filter(|title| TAG_CATEGORIES.contains(title))
            .map(str::to_lowercase)
    }

    fn set_options(&mut self, names: Vec<String>, ids: Vec<Value>) {
        self.0.insert(
            "options".to_string(),
            Value::Array(names.into_iter().map(Value::String).collect()),
        );
        self.0.insert(
            "ids".to_string(),
            Value::Array(ids),
        );
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// (filter title, number of tags written), in file order.
    pub updated: Vec<(String, usize)>,
}

pub fn parse_filters(path: &Path, content: &str) -> SyncResult<Vec<FilterDefinition>> {
    let document: Value = serde_json::from_str(content).map_err(|source| SyncError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let Value::Array(entries) = document else {
        return Err(SyncError::schema(format!(
            "{} must contain a top-level array",
            path.display()
        )));
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            Value::Object(map) => Ok(FilterDefinition(map)),
            other => Err(SyncError::schema(format!(
                "filter #{} in {} is not an object: {}",
                index,
                path.display(),
                other
            ))),
        })
        .collect()
}

pub async fn load_filters(path: &Path) -> SyncResult<Vec<FilterDefinition>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SyncError::io(path, e))?;
    parse_filters(path, &content)
}

/// Rewrites the options of every tag-driven filter in place.
pub fn merge_tags(
    filters: &mut [FilterDefinition],
    tags: &[Tag],
    locale: &str,
) -> SyncResult<MergeReport> {
    let mut report = MergeReport::default();

    for filter in filters.iter_mut() {
        let Some(group) = filter.tag_group() else {
            continue;
        };
        let options = options_for_group(tags, &group, locale)?;
        let title = filter.title().unwrap_or_default().to_string();
        if options.is_empty() {
            tracing::warn!("no '{}' tags in response, clearing filter {}", group, title);
        } else {
            tracing::info!("{}: {} tags", title, options.len());
        }

        report.updated.push((title, options.len()));
        let (names, ids) = options.into_iter().map(|o| (o.name, o.id)).unzip();
        filter.set_options(names, ids);
    }

    Ok(report)
}

/// Tab-indented pretty printer. With `ensure_ascii`, everything outside
/// printable ASCII is written as `\uXXXX`.
struct FilterFormatter {
    pretty: PrettyFormatter<'static>,
    ensure_ascii: bool,
}

impl FilterFormatter {
    fn new(ensure_ascii: bool) -> Self {
        FilterFormatter {
            pretty: PrettyFormatter::with_indent(b"\t"),
            ensure_ascii,
        }
    }
}

impl Formatter for FilterFormatter {
    fn begin_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_array(writer)
    }

    fn end_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.pretty.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_object(writer)
    }

    fn end_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.pretty.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_object_value(writer)
    }

    fn write_string_fragment<W: ?Sized + Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        if !self.ensure_ascii {
            return writer.write_all(fragment.as_bytes());
        }
        let mut units = [0u16; 2];
        for c in fragment.chars() {
            if (' '..='~').contains(&c) {
                writer.write_all(&[c as u8])?;
            } else {
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// The exact bytes `filters.json` should contain, trailing newline included.
pub fn render_filters(filters: &[FilterDefinition], ensure_ascii: bool) -> SyncResult<String> {
    let mut buffer = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buffer, FilterFormatter::new(ensure_ascii));
    filters
        .serialize(&mut serializer)
        .map_err(|e| SyncError::schema(format!("could not serialize filters: {}", e)))?;
    buffer.push(b'\n');
    String::from_utf8(buffer).map_err(|e| SyncError::schema(e.to_string()))
}

pub async fn write_filters(path: &Path, rendered: &str) -> SyncResult<()> {
    tokio::fs::write(path, rendered)
        .await
        .map_err(|e| SyncError::io(path, e))
}

/// Whether the file on disk already holds exactly `rendered`.
pub async fn is_up_to_date(path: &Path, rendered: &str) -> SyncResult<bool> {
    let current = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SyncError::io(path, e))?;
    Ok(current == rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag_utils::tag;
    use serde_json::json;
    use std::path::PathBuf;

    fn filters(value: Value) -> Vec<FilterDefinition> {
        parse_filters(&PathBuf::from("filters.json"), &value.to_string()).unwrap()
    }

    #[test]
    fn genre_scenario() {
        let mut list = filters(json!([{ "title": "Genre" }, { "title": "Other" }]));
        let before_other = list[1].clone();
        let tags = vec![tag("1", "Romance", "genre"), tag("2", "Action", "genre")];

        let report = merge_tags(&mut list, &tags, "en").unwrap();

        assert_eq!(list[0].get("options"), Some(&json!(["Action", "Romance"])));
        assert_eq!(list[0].get("ids"), Some(&json!(["2", "1"])));
        assert_eq!(list[1], before_other);
        assert_eq!(report.updated, vec![("Genre".to_string(), 2)]);
    }

    #[test]
    fn each_category_only_gets_its_own_group() {
        let mut list = filters(json!([
            { "title": "Content" },
            { "title": "Format" },
            { "title": "Genre" },
            { "title": "Theme" }
        ]));
        let tags = vec![
            tag("c1", "Gore", "content"),
            tag("f1", "Web Comic", "format"),
            tag("g1", "Drama", "genre"),
            tag("t1", "Zombies", "theme"),
            tag("f2", "4-Koma", "format"),
            tag("x1", "Oddity", "misc"),
        ];

        merge_tags(&mut list, &tags, "en").unwrap();

        assert_eq!(list[0].get("ids"), Some(&json!(["c1"])));
        assert_eq!(list[1].get("options"), Some(&json!(["4-Koma", "Web Comic"])));
        assert_eq!(list[1].get("ids"), Some(&json!(["f2", "f1"])));
        assert_eq!(list[2].get("ids"), Some(&json!(["g1"])));
        assert_eq!(list[3].get("ids"), Some(&json!(["t1"])));
    }

    #[test]
    fn title_match_is_case_sensitive() {
        let mut list = filters(json!([{ "title": "genre" }, { "title": "GENRE" }, { "id": "sort" }]));
        let before = list.clone();
        merge_tags(&mut list, &[tag("1", "Action", "genre")], "en").unwrap();
        assert_eq!(list, before);
    }

    #[test]
    fn replaces_stale_options_and_empties_missing_category() {
        let mut list = filters(json!([{
            "type": "multi-select",
            "title": "Theme",
            "options": ["Old"],
            "ids": ["old-id"],
            "canExclude": true
        }]));

        let report = merge_tags(&mut list, &[tag("1", "Action", "genre")], "en").unwrap();

        assert_eq!(list[0].get("options"), Some(&json!([])));
        assert_eq!(list[0].get("ids"), Some(&json!([])));
        assert_eq!(list[0].get("canExclude"), Some(&json!(true)));
        assert_eq!(report.updated, vec![("Theme".to_string(), 0)]);
    }

    #[test]
    fn renders_with_tabs_and_single_trailing_newline() {
        let mut list = filters(json!([{ "type": "multi-select", "title": "Genre" }, { "title": "Sort", "options": [] }]));
        merge_tags(&mut list, &[tag("2", "Action", "genre")], "en").unwrap();

        let rendered = render_filters(&list, true).unwrap();
        let expected = "[\n\t{\n\t\t\"type\": \"multi-select\",\n\t\t\"title\": \"Genre\",\n\t\t\"options\": [\n\t\t\t\"Action\"\n\t\t],\n\t\t\"ids\": [\n\t\t\t\"2\"\n\t\t]\n\t},\n\t{\n\t\t\"title\": \"Sort\",\n\t\t\"options\": []\n\t}\n]\n";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn existing_keys_keep_their_position() {
        let mut list = filters(json!([{ "ids": [], "title": "Genre", "options": [], "isGenre": true }]));
        merge_tags(&mut list, &[tag("2", "Action", "genre")], "en").unwrap();

        let rendered = render_filters(&list, true).unwrap();
        let ids = rendered.find("\"ids\"").unwrap();
        let title = rendered.find("\"title\"").unwrap();
        let options = rendered.find("\"options\"").unwrap();
        let is_genre = rendered.find("\"isGenre\"").unwrap();
        assert!(ids < title && title < options && options < is_genre);
    }

    #[test]
    fn non_ascii_is_escaped_when_requested() {
        let list = filters(json!([{ "title": "Other", "options": ["Café", "日本", "😀", "a\u{7f}"] }]));

        let escaped = render_filters(&list, true).unwrap();
        assert!(escaped.is_ascii());
        assert!(escaped.contains("\"Caf\\u00e9\""));
        assert!(escaped.contains("\"\\u65e5\\u672c\""));
        assert!(escaped.contains("\"\\ud83d\\ude00\""));
        assert!(escaped.contains("\"a\\u007f\""));

        let raw = render_filters(&list, false).unwrap();
        assert!(raw.contains("\"Café\""));
        assert!(raw.contains("\"日本\""));
    }

    #[test]
    fn rendering_is_deterministic_and_round_trips() {
        let input = "[\n\t{\n\t\t\"title\": \"Other\",\n\t\t\"value\": 3,\n\t\t\"flag\": null\n\t}\n]\n";
        let list = parse_filters(&PathBuf::from("filters.json"), input).unwrap();
        assert_eq!(render_filters(&list, true).unwrap(), input);
        assert_eq!(render_filters(&list, true).unwrap(), render_filters(&list, true).unwrap());
    }

    #[test]
    fn rejects_documents_that_are_not_filter_lists() {
        let path = PathBuf::from("filters.json");
        assert!(matches!(parse_filters(&path, "{\"title\": \"Genre\"}"), Err(SyncError::Schema(_))));
        assert!(matches!(parse_filters(&path, "[{\"title\": \"Genre\"}, 3]"), Err(SyncError::Schema(_))));
        assert!(matches!(parse_filters(&path, "[{"), Err(SyncError::Json { .. })));
    }

    #[tokio::test]
    async fn write_then_check_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filters.json");
        let list = filters(json!([{ "title": "Other" }]));
        let rendered = render_filters(&list, true).unwrap();

        write_filters(&path, &rendered).await.unwrap();
        assert!(is_up_to_date(&path, &rendered).await.unwrap());
        assert!(!is_up_to_date(&path, "[]\n").await.unwrap());

        let loaded = load_filters(&path).await.unwrap();
        assert_eq!(loaded, list);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_filters(&dir.path().join("absent.json")).await.unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
    }

    #[test]
    fn numbers_use_serde_json_formatting() {
        let input = "[{\"title\": \"Other\", \"small\": 1e-05, \"half\": 0.5, \"count\": 12}]";
        let list = parse_filters(&PathBuf::from("filters.json"), input).unwrap();
        let rendered = render_filters(&list, true).unwrap();
        assert!(rendered.contains("\"small\": 0.00001,"));
        assert!(rendered.contains("\"half\": 0.5,"));
        assert!(rendered.contains("\"count\": 12\n"));
    }
}
