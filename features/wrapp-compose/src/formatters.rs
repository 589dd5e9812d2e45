//! Rendering of type names and lists for diagnostics and error messages.

/// Placeholder for an empty list
pub const NONE: &str = "None";

/// Separator used between list items
pub const LIST_SEPARATOR: &str = ", ";

/// Renders a type name without module paths, including inside generic arguments
///
/// `alloc::vec::Vec<alloc::sync::Arc<my_crate::Foo>>` becomes `Vec<Arc<Foo>>`
pub fn format_type_name(type_name: &str) -> String {
    let mut formatted = String::with_capacity(type_name.len());
    let mut path = String::new();

    for c in type_name.chars() {
        if c.is_alphanumeric() || c == '_' || c == ':' {
            path.push(c);
            continue;
        }
        push_last_segment(&mut formatted, &path);
        path.clear();
        formatted.push(c);
    }
    push_last_segment(&mut formatted, &path);

    formatted
}

fn push_last_segment(formatted: &mut String, path: &str) {
    if let Some(segment) = path.rsplit("::").next() {
        formatted.push_str(segment);
    }
}

/// Sorts and joins the items, or returns [NONE] if there is nothing to show
pub fn readable_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut items: Vec<String> = items
        .into_iter()
        .map(|item| item.as_ref().to_string())
        .collect();
    items.sort();

    let reply = items.join(LIST_SEPARATOR);
    if reply.is_empty() {
        return NONE.to_string();
    }
    reply
}
