/// 提示词最大字符数（超出部分截断）
pub const MAX_PROMPT_CHARS: usize = 2000;

/// 清洗提示词：丢弃控制字符（保留换行），合并连续空白，去除首尾空白并截断。
///
/// 输出对调用后端的一方是不透明文本，不会被再次校验。
pub fn sanitize_prompt(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_PROMPT_CHARS));
    let mut pending_space: Option<char> = None;
    let mut count = 0usize;

    for ch in raw.chars() {
        if ch.is_control() && ch != '\n' && ch != '\t' {
            continue;
        }
        if ch.is_whitespace() {
            // 连续空白折叠为一个；只要其中出现过换行就保留换行
            pending_space = match (pending_space, ch) {
                (Some('\n'), _) | (_, '\n') => Some('\n'),
                _ => Some(' '),
            };
            continue;
        }
        if let Some(sp) = pending_space.take()
            && !out.is_empty()
        {
            if count + 1 >= MAX_PROMPT_CHARS {
                break;
            }
            out.push(sp);
            count += 1;
        }
        if count >= MAX_PROMPT_CHARS {
            break;
        }
        out.push(ch);
        count += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_characters_and_collapses_whitespace() {
        assert_eq!(sanitize_prompt("  a\u{0007} red   cube \t "), "a red cube");
    }

    #[test]
    fn keeps_newlines_between_words() {
        assert_eq!(sanitize_prompt("line one \n\n line two"), "line one\nline two");
    }

    #[test]
    fn keeps_unicode_text() {
        assert_eq!(sanitize_prompt("一只 红色的 猫 🐱"), "一只 红色的 猫 🐱");
    }

    #[test]
    fn truncates_long_prompts() {
        let long = "x".repeat(MAX_PROMPT_CHARS + 50);
        assert_eq!(sanitize_prompt(&long).chars().count(), MAX_PROMPT_CHARS);
    }
}
