use std::collections::BTreeMap;

/// Display-name lookup against the target organisation's directory service.
pub trait UserDirectory {
    fn lookup_display_name(&self, login: &str) -> Option<String>;
}

/// Directory backed by a static login → name table (the `[directory]` config section).
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    names: BTreeMap<String, String>,
}

impl StaticDirectory {
    pub fn new(names: BTreeMap<String, String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl UserDirectory for StaticDirectory {
    fn lookup_display_name(&self, login: &str) -> Option<String> {
        self.names
            .get(login)
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_directory_ignores_blank_names() {
        let directory = StaticDirectory::new(BTreeMap::from([
            ("js123".to_string(), "John Smith".to_string()),
            ("ghost".to_string(), "  ".to_string()),
        ]));
        assert_eq!(
            directory.lookup_display_name("js123").as_deref(),
            Some("John Smith")
        );
        assert_eq!(directory.lookup_display_name("ghost"), None);
        assert_eq!(directory.lookup_display_name("nobody"), None);
    }
}
