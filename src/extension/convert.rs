//! Field-by-field conversion between host models and foreign model objects
//!
//! Extensions are compiled against many versions of the model classes, so every field is
//! read and written independently. A field that is missing or has an unexpected type
//! takes the host default instead of failing the conversion.

use super::catalogue::{
    Chapter, Filter, FilterList, Manga, MangasPage, Page, SortSelection, UNKNOWN_CHAPTER_NUMBER,
};
use super::foreign::{ForeignError, ForeignObject, ForeignRef, ForeignValue, LoaderScope};

pub const SMANGA_CLASS: &str = "eu.kanade.tachiyomi.source.model.SManga";
pub const SCHAPTER_CLASS: &str = "eu.kanade.tachiyomi.source.model.SChapter";
pub const FILTER_LIST_CLASS: &str = "eu.kanade.tachiyomi.source.model.FilterList";
pub const SORT_SELECTION_CLASS: &str = "eu.kanade.tachiyomi.source.model.Filter$Sort$Selection";

pub(crate) fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Read a property through its getter, then as a field
pub fn read_property(obj: &dyn ForeignObject, name: &str) -> Option<ForeignValue> {
    match obj.invoke(&format!("get{}", capitalize(name)), &[]) {
        Ok(value) => Some(value),
        Err(e) if e.is_missing_member() => obj.get_field(name).ok(),
        Err(e) => {
            tracing::debug!(class = %obj.class_name(), property = name, error = %e, "Getter threw");
            None
        }
    }
}

/// Write a property through its setter, then as a field; returns whether it stuck
pub fn write_property(obj: &dyn ForeignObject, name: &str, value: ForeignValue) -> bool {
    match obj.invoke(&format!("set{}", capitalize(name)), &[value.clone()]) {
        Ok(_) => true,
        Err(e) if e.is_missing_member() => obj.set_field(name, value).is_ok(),
        Err(e) => {
            tracing::debug!(class = %obj.class_name(), property = name, error = %e, "Setter threw");
            false
        }
    }
}

fn string_prop(obj: &dyn ForeignObject, name: &str) -> Option<String> {
    read_property(obj, name).and_then(|v| v.as_str().map(str::to_string))
}

fn items(value: &ForeignValue) -> Vec<ForeignValue> {
    match value {
        ForeignValue::List(items) => items.clone(),
        _ => Vec::new(),
    }
}

fn display_text(value: &ForeignValue) -> String {
    match value {
        ForeignValue::Str(s) => s.clone(),
        ForeignValue::Object(obj) => obj
            .invoke("toString", &[])
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default(),
        ForeignValue::Int(v) => v.to_string(),
        ForeignValue::Long(v) => v.to_string(),
        _ => String::new(),
    }
}

/// Instantiate a model through its `create()` factory, or a no-arg constructor
fn new_model(scope: &dyn LoaderScope, class: &str) -> Result<ForeignRef, ForeignError> {
    let class = scope.load_class(class)?;
    match class.invoke_static("create", &[]) {
        Ok(ForeignValue::Object(obj)) => Ok(obj),
        Ok(other) => Err(ForeignError::TypeMismatch {
            expected: class.name(),
            found: other.type_name().to_string(),
        }),
        Err(e) if e.is_missing_member() => class.construct(&[]),
        Err(e) => Err(e),
    }
}

pub fn manga_to_foreign(scope: &dyn LoaderScope, manga: &Manga) -> Result<ForeignRef, ForeignError> {
    let obj = new_model(scope, SMANGA_CLASS)?;
    let target = obj.as_ref();

    write_property(target, "url", manga.url.as_str().into());
    write_property(target, "title", manga.title.as_str().into());
    write_property(target, "artist", ForeignValue::from_opt_str(manga.artist.as_deref()));
    write_property(target, "author", ForeignValue::from_opt_str(manga.author.as_deref()));
    write_property(target, "description", ForeignValue::from_opt_str(manga.description.as_deref()));
    write_property(target, "genre", ForeignValue::from_opt_str(manga.genre.as_deref()));
    write_property(target, "status", ForeignValue::Int(manga.status));
    write_property(target, "thumbnail_url", ForeignValue::from_opt_str(manga.thumbnail_url.as_deref()));
    write_property(target, "initialized", ForeignValue::Bool(manga.initialized));

    Ok(obj)
}

pub fn manga_from_foreign(value: &ForeignValue) -> Manga {
    let Some(obj) = value.as_object() else {
        return Manga::default();
    };
    let obj = obj.as_ref();

    Manga {
        url: string_prop(obj, "url").unwrap_or_default(),
        title: string_prop(obj, "title").unwrap_or_default(),
        artist: string_prop(obj, "artist"),
        author: string_prop(obj, "author"),
        description: string_prop(obj, "description"),
        genre: string_prop(obj, "genre"),
        status: read_property(obj, "status").and_then(|v| v.as_i32()).unwrap_or(0),
        thumbnail_url: string_prop(obj, "thumbnail_url"),
        initialized: read_property(obj, "initialized").and_then(|v| v.as_bool()).unwrap_or(false),
    }
}

pub fn chapter_to_foreign(scope: &dyn LoaderScope, chapter: &Chapter) -> Result<ForeignRef, ForeignError> {
    let obj = new_model(scope, SCHAPTER_CLASS)?;
    let target = obj.as_ref();

    write_property(target, "url", chapter.url.as_str().into());
    write_property(target, "name", chapter.name.as_str().into());
    write_property(target, "date_upload", ForeignValue::Long(chapter.date_upload));
    write_property(target, "chapter_number", ForeignValue::Float(chapter.chapter_number));
    write_property(target, "scanlator", ForeignValue::from_opt_str(chapter.scanlator.as_deref()));

    Ok(obj)
}

pub fn chapter_from_foreign(value: &ForeignValue) -> Chapter {
    let Some(obj) = value.as_object() else {
        return Chapter::default();
    };
    let obj = obj.as_ref();

    Chapter {
        url: string_prop(obj, "url").unwrap_or_default(),
        name: string_prop(obj, "name").unwrap_or_default(),
        date_upload: read_property(obj, "date_upload").and_then(|v| v.as_i64()).unwrap_or(0),
        chapter_number: read_property(obj, "chapter_number")
            .and_then(|v| v.as_f32())
            .unwrap_or(UNKNOWN_CHAPTER_NUMBER),
        scanlator: string_prop(obj, "scanlator"),
    }
}

pub fn chapters_from_foreign(value: &ForeignValue) -> Vec<Chapter> {
    items(value).iter().map(chapter_from_foreign).collect()
}

/// Pages without an `index` are numbered by position
pub fn pages_from_foreign(value: &ForeignValue) -> Vec<Page> {
    items(value)
        .iter()
        .enumerate()
        .filter_map(|(position, item)| {
            let obj = item.as_object()?.as_ref();
            Some(Page {
                index: read_property(obj, "index")
                    .and_then(|v| v.as_i32())
                    .unwrap_or(position as i32),
                url: string_prop(obj, "url").unwrap_or_default(),
                image_url: string_prop(obj, "imageUrl"),
            })
        })
        .collect()
}

pub fn mangas_page_from_foreign(value: &ForeignValue) -> MangasPage {
    let Some(obj) = value.as_object() else {
        return MangasPage::default();
    };
    let obj = obj.as_ref();

    MangasPage {
        mangas: read_property(obj, "mangas")
            .map(|list| items(&list).iter().map(manga_from_foreign).collect())
            .unwrap_or_default(),
        has_next_page: read_property(obj, "hasNextPage")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterKind {
    Header,
    Separator,
    Text,
    CheckBox,
    TriState,
    Select,
    Sort,
    Group,
}

const FILTER_KINDS: &[(&str, FilterKind)] = &[
    ("Filter$Header", FilterKind::Header),
    ("Filter$Separator", FilterKind::Separator),
    ("Filter$Text", FilterKind::Text),
    ("Filter$CheckBox", FilterKind::CheckBox),
    ("Filter$TriState", FilterKind::TriState),
    ("Filter$Select", FilterKind::Select),
    ("Filter$Sort", FilterKind::Sort),
    ("Filter$Group", FilterKind::Group),
];

fn filter_kind(obj: &dyn ForeignObject, state: &ForeignValue) -> FilterKind {
    let mut names = obj.interfaces();
    names.push(obj.class_name());

    for name in &names {
        if let Some((_, kind)) = FILTER_KINDS.iter().find(|(suffix, _)| name.ends_with(suffix)) {
            return *kind;
        }
    }

    // Unknown hierarchy: infer from the state's shape
    match state {
        ForeignValue::Bool(_) => FilterKind::CheckBox,
        ForeignValue::Str(_) => FilterKind::Text,
        ForeignValue::Int(_) | ForeignValue::Long(_) => FilterKind::TriState,
        ForeignValue::List(_) => FilterKind::Group,
        _ => FilterKind::Header,
    }
}

fn sort_selection_from_foreign(value: &ForeignValue) -> Option<SortSelection> {
    let obj = value.as_object()?.as_ref();
    Some(SortSelection {
        index: read_property(obj, "index").and_then(|v| v.as_i32()).unwrap_or(0),
        ascending: read_property(obj, "ascending").and_then(|v| v.as_bool()).unwrap_or(false),
    })
}

pub fn filter_from_foreign(value: &ForeignValue) -> Option<Filter> {
    let obj = value.as_object()?.as_ref();
    let name = string_prop(obj, "name").unwrap_or_default();
    let state = read_property(obj, "state").unwrap_or(ForeignValue::Null);
    let values = || {
        read_property(obj, "values")
            .map(|v| items(&v).iter().map(display_text).collect())
            .unwrap_or_default()
    };

    let filter = match filter_kind(obj, &state) {
        FilterKind::Header => Filter::Header { name },
        FilterKind::Separator => Filter::Separator { name },
        FilterKind::Text => Filter::Text {
            name,
            state: state.as_str().unwrap_or_default().to_string(),
        },
        FilterKind::CheckBox => Filter::CheckBox {
            name,
            state: state.as_bool().unwrap_or(false),
        },
        FilterKind::TriState => Filter::TriState {
            name,
            state: state.as_i32().unwrap_or(0),
        },
        FilterKind::Select => Filter::Select {
            name,
            values: values(),
            state: state.as_i32().unwrap_or(0),
        },
        FilterKind::Sort => Filter::Sort {
            name,
            values: values(),
            state: sort_selection_from_foreign(&state),
        },
        FilterKind::Group => Filter::Group {
            name,
            filters: items(&state).iter().filter_map(filter_from_foreign).collect(),
        },
    };

    Some(filter)
}

/// The filters inside a foreign `FilterList` (or a bare list)
fn foreign_filters(value: &ForeignValue) -> Vec<ForeignValue> {
    match value {
        ForeignValue::List(items) => items.clone(),
        ForeignValue::Object(obj) => read_property(obj.as_ref(), "list")
            .map(|list| items(&list))
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

pub fn filter_list_from_foreign(value: &ForeignValue) -> FilterList {
    FilterList::new(
        foreign_filters(value)
            .iter()
            .filter_map(filter_from_foreign)
            .collect(),
    )
}

pub fn empty_filter_list(scope: &dyn LoaderScope) -> Result<ForeignRef, ForeignError> {
    scope
        .load_class(FILTER_LIST_CLASS)?
        .construct(&[ForeignValue::List(Vec::new())])
}

fn state_to_foreign(scope: &dyn LoaderScope, filter: &Filter) -> Option<ForeignValue> {
    match filter {
        Filter::Text { state, .. } => Some(state.as_str().into()),
        Filter::CheckBox { state, .. } => Some(ForeignValue::Bool(*state)),
        Filter::TriState { state, .. } | Filter::Select { state, .. } => Some(ForeignValue::Int(*state)),
        Filter::Sort { state: None, .. } => Some(ForeignValue::Null),
        Filter::Sort { state: Some(selection), .. } => {
            let class = scope.load_class(SORT_SELECTION_CLASS).ok()?;
            class
                .construct(&[ForeignValue::Int(selection.index), ForeignValue::Bool(selection.ascending)])
                .ok()
                .map(ForeignValue::Object)
        }
        Filter::Header { .. } | Filter::Separator { .. } | Filter::Group { .. } => None,
    }
}

/// Copy host filter state onto the source's own foreign filters, matched by name
///
/// Returns the number of filters updated. Filters the host does not know are left at
/// the source's defaults.
pub fn apply_filter_state(scope: &dyn LoaderScope, foreign: &ForeignValue, host: &[Filter]) -> usize {
    let mut applied = 0;

    for item in foreign_filters(foreign) {
        let Some(obj) = item.as_object() else { continue };
        let obj = obj.as_ref();
        let Some(name) = string_prop(obj, "name") else { continue };
        let Some(host_filter) = host.iter().find(|f| f.name() == name && f.is_stateful()) else {
            continue;
        };

        if let Filter::Group { filters, .. } = host_filter {
            if let Some(children) = read_property(obj, "state") {
                applied += apply_filter_state(scope, &children, filters);
            }
            continue;
        }

        if let Some(state) = state_to_foreign(scope, host_filter) {
            if write_property(obj, "state", state) {
                applied += 1;
            }
        }
    }

    applied
}
