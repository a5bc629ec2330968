//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// First `max_chars` characters of `text` followed by "...".
/// Used for task display names when a problem has no title.
pub fn ellipsize(text: &str, max_chars: usize) -> String {
  let head: String = text.chars().take(max_chars).collect();
  format!("{head}...")
}

/// Escape literal line breaks so a statement renders on one markdown line.
pub fn escape_newlines(text: &str) -> String {
  text.replace("\r\n", "\\\\").replace('\n', "\\\\")
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}
