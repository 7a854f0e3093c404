use crate::entity::Entity;
use crate::ui::theme::{stderr, stdout, Tone};
use crate::ui::Icons;

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, stdout().paint(Tone::Title, text));
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", stdout().paint(Tone::Title, title));
}

pub fn status(icon: &str, label: &str, value: &str) {
    println!("{} {}: {}", icon, stdout().paint(Tone::Label, label), value);
}

pub fn summary_row(label: &str, value: &str) {
    println!("  {} {}", stdout().paint(Tone::Label, label), value);
}

pub fn timing(elapsed: &str) {
    println!("{} {}", stdout().paint(Tone::Label, Icons::CLOCK), elapsed);
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, stdout().paint(Tone::Good, label));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, stderr().paint(Tone::Bad, label));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, stderr().paint(Tone::Caution, label));
}

pub fn muted(text: &str) -> String {
    stdout().paint(Tone::Faint, text)
}

/// Green or red dot for a URL's latest reachability
pub fn online_marker(is_online: bool) -> &'static str {
    if is_online { Icons::ONLINE } else { Icons::OFFLINE }
}

/// One listing line: `[kind] display`
pub fn entity_line(entity: &Entity) -> String {
    let icon = match entity {
        Entity::Publication(_) | Entity::Accession(_) => Icons::BOOK,
        Entity::Grant(_) | Entity::GrantAgency(_) => Icons::MONEY,
        Entity::Url(u) => online_marker(u.is_online()),
        Entity::ResourceMention(_) | Entity::MatchedAlias(_) => Icons::LINK,
        _ => Icons::TAG,
    };
    let kind = format!("[{}]", entity.kind());
    format!("{} {} {}", icon, stdout().paint(Tone::Kind, &kind), entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Version;

    #[test]
    fn test_entity_line_names_kind() {
        let line = entity_line(&Entity::from(Version {
            name: Some("run".to_string()),
            ..Version::default()
        }));
        assert!(line.contains("[version]"));
        assert!(line.contains("run"));
    }

    #[test]
    fn test_online_marker() {
        assert_eq!(online_marker(true), Icons::ONLINE);
        assert_eq!(online_marker(false), Icons::OFFLINE);
    }
}
