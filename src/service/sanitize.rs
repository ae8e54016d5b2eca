/// 去掉不宜直接返回给调用方的字符
/// Strips characters that are unsafe to surface to callers: control
/// characters (line breaks included), markup delimiters, quotes and
/// backslashes. Surrounding whitespace is trimmed.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | '"' | '\'' | '`' | '\\'))
        .collect::<String>()
        .trim()
        .to_string()
}
