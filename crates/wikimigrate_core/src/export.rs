use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use roxmltree::{Document, Node};

use crate::error::StructuralError;

pub const EXPORT_ROOT_TAG: &str = "hibernate-generic";
pub const DEFAULT_STATUS: &str = "current";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRecord {
    pub id: String,
    pub title: String,
}

/// One version of a page or blog post. Every stored version is its own record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub id: String,
    pub title: Option<String>,
    pub parent_id: Option<String>,
    pub version: u32,
    /// `None` is the "no content" sentinel.
    pub body_id: Option<String>,
    pub status: String,
    pub attachment_ids: Vec<String>,
    pub historical_ids: Vec<String>,
}

impl PageRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>, version: u32) -> Self {
        Self {
            id: id.into(),
            title: Some(title.into()),
            parent_id: None,
            version,
            body_id: None,
            status: DEFAULT_STATUS.to_string(),
            attachment_ids: Vec::new(),
            historical_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyRecord {
    pub id: String,
    pub body: String,
}

/// Export records grouped by kind, in document order.
#[derive(Debug, Clone, Default)]
pub struct ExportRecords {
    pub users: Vec<UserRecord>,
    pub attachments: Vec<AttachmentRecord>,
    pub pages: Vec<PageRecord>,
    pub blog_posts: Vec<PageRecord>,
    pub bodies: Vec<BodyRecord>,
    /// Object classes present in the dump that the migration does not use.
    pub ignored_classes: BTreeMap<String, usize>,
}

impl ExportRecords {
    pub fn record_count(&self) -> usize {
        self.users.len()
            + self.attachments.len()
            + self.pages.len()
            + self.blog_posts.len()
            + self.bodies.len()
    }
}

pub fn load_entities(path: &Path) -> Result<ExportRecords> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_entities(&content).with_context(|| format!("failed to load export {}", path.display()))
}

pub fn parse_entities(xml: &str) -> Result<ExportRecords> {
    let document = Document::parse(xml).context("export is not well-formed XML")?;
    let root = document.root_element();
    if root.tag_name().name() != EXPORT_ROOT_TAG {
        return Err(StructuralError::UnrecognizedRoot(root.tag_name().name().to_string()).into());
    }

    let mut records = ExportRecords::default();
    for object in root.children().filter(|node| node.has_tag_name("object")) {
        let class = object.attribute("class").unwrap_or("");
        match class {
            "ConfluenceUserImpl" => records.users.push(parse_user(object)?),
            "Attachment" => records.attachments.push(parse_attachment(object)?),
            "Page" => records.pages.push(parse_page(object, class)?),
            "BlogPost" => records.blog_posts.push(parse_page(object, class)?),
            "BodyContent" => records.bodies.push(parse_body(object)?),
            other => *records.ignored_classes.entry(other.to_string()).or_insert(0) += 1,
        }
    }
    Ok(records)
}

fn parse_user(object: Node) -> Result<UserRecord, StructuralError> {
    Ok(UserRecord {
        id: object_id(object, "ConfluenceUserImpl")?,
        username: property_text(object, "name"),
        email: property_text(object, "email"),
    })
}

fn parse_attachment(object: Node) -> Result<AttachmentRecord, StructuralError> {
    let id = object_id(object, "Attachment")?;
    let title = property_text(object, "title").ok_or_else(|| StructuralError::MissingField {
        class: "Attachment".to_string(),
        field: "title".to_string(),
    })?;
    Ok(AttachmentRecord { id, title })
}

fn parse_page(object: Node, class: &str) -> Result<PageRecord, StructuralError> {
    let id = object_id(object, class)?;

    let parent_id = match property(object, "parent") {
        Some(parent) => {
            let parent_class = parent.attribute("class").unwrap_or(class);
            if !matches!(parent_class, "Page" | "BlogPost") {
                return Err(StructuralError::UnexpectedRelation {
                    page: id,
                    class: parent_class.to_string(),
                });
            }
            child_text(parent, "id")
        }
        None => None,
    };

    let version = match property_text(object, "version") {
        Some(raw) => raw.parse::<u32>().map_err(|_| StructuralError::MalformedField {
            class: class.to_string(),
            id: id.clone(),
            field: "version".to_string(),
            value: raw.clone(),
        })?,
        None => 0,
    };

    let body_id = object
        .children()
        .filter(|node| node.has_tag_name("collection"))
        .flat_map(|collection| collection.children())
        .find(|node| node.has_tag_name("element") && node.attribute("class") == Some("BodyContent"))
        .and_then(|element| child_text(element, "id"));

    Ok(PageRecord {
        title: property_text(object, "title"),
        parent_id,
        version,
        body_id,
        status: property_text(object, "contentStatus").unwrap_or_else(|| DEFAULT_STATUS.to_string()),
        attachment_ids: collection_ids(object, "attachments", Some("Attachment")),
        historical_ids: collection_ids(object, "historicalVersions", None),
        id,
    })
}

fn parse_body(object: Node) -> Result<BodyRecord, StructuralError> {
    let id = object_id(object, "BodyContent")?;
    let body = property(object, "body")
        .map(|node| {
            node.descendants()
                .filter(|child| child.is_text())
                .filter_map(|child| child.text())
                .collect::<String>()
        })
        .unwrap_or_default();
    Ok(BodyRecord { id, body })
}

fn object_id(object: Node, class: &str) -> Result<String, StructuralError> {
    child_text(object, "id").ok_or_else(|| StructuralError::MissingField {
        class: class.to_string(),
        field: "id".to_string(),
    })
}

fn property<'a, 'input>(object: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    object
        .children()
        .find(|node| node.has_tag_name("property") && node.attribute("name") == Some(name))
}

fn property_text(object: Node, name: &str) -> Option<String> {
    property(object, name).and_then(trimmed_text)
}

fn child_text(node: Node, tag: &str) -> Option<String> {
    node.children()
        .find(|child| child.has_tag_name(tag))
        .and_then(trimmed_text)
}

fn trimmed_text(node: Node) -> Option<String> {
    let text = node.text()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn collection_ids(object: Node, name: &str, element_class: Option<&str>) -> Vec<String> {
    object
        .children()
        .filter(|node| node.has_tag_name("collection") && node.attribute("name") == Some(name))
        .flat_map(|collection| collection.children())
        .filter(|node| node.has_tag_name("element"))
        .filter(|node| element_class.is_none_or(|class| node.attribute("class") == Some(class)))
        .filter_map(|element| child_text(element, "id"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<hibernate-generic datetime="2020-01-01 00:00:00">
  <object class="ConfluenceUserImpl" package="com.atlassian.confluence.user">
    <id name="key"><![CDATA[8a7f]]></id>
    <property name="name"><![CDATA[jsmith]]></property>
    <property name="email"><![CDATA[john.smith@example.org]]></property>
  </object>
  <object class="Attachment" package="com.atlassian.confluence.pages">
    <id name="id">300</id>
    <property name="title"><![CDATA[diagram.png]]></property>
  </object>
  <object class="Page" package="com.atlassian.confluence.pages">
    <id name="id">101</id>
    <property name="title"><![CDATA[Intro]]></property>
    <property name="parent" class="Page" package="com.atlassian.confluence.pages"><id name="id">100</id></property>
    <property name="version">2</property>
    <property name="contentStatus"><![CDATA[current]]></property>
    <collection name="bodyContents" class="java.util.Collection">
      <element class="BodyContent" package="com.atlassian.confluence.core"><id name="id">500</id></element>
    </collection>
    <collection name="attachments" class="java.util.List">
      <element class="Attachment" package="com.atlassian.confluence.pages"><id name="id">300</id></element>
    </collection>
    <collection name="historicalVersions" class="java.util.List">
      <element class="Page" package="com.atlassian.confluence.pages"><id name="id">99</id></element>
    </collection>
  </object>
  <object class="BlogPost" package="com.atlassian.confluence.pages">
    <id name="id">700</id>
    <property name="title"><![CDATA[News]]></property>
  </object>
  <object class="BodyContent" package="com.atlassian.confluence.core">
    <id name="id">500</id>
    <property name="body"><![CDATA[<p>Hello &amp; welcome</p>]]></property>
  </object>
  <object class="Space" package="com.atlassian.confluence.spaces">
    <id name="id">1</id>
  </object>
</hibernate-generic>"#;

    #[test]
    fn parses_records_by_class() {
        let records = parse_entities(SAMPLE).expect("parse");
        assert_eq!(records.users.len(), 1);
        assert_eq!(records.users[0].username.as_deref(), Some("jsmith"));
        assert_eq!(records.attachments[0].title, "diagram.png");
        assert_eq!(records.blog_posts.len(), 1);
        assert_eq!(records.ignored_classes.get("Space"), Some(&1));

        let page = &records.pages[0];
        assert_eq!(page.id, "101");
        assert_eq!(page.parent_id.as_deref(), Some("100"));
        assert_eq!(page.version, 2);
        assert_eq!(page.body_id.as_deref(), Some("500"));
        assert_eq!(page.attachment_ids, vec!["300".to_string()]);
        assert_eq!(page.historical_ids, vec!["99".to_string()]);

        let blog = &records.blog_posts[0];
        assert_eq!(blog.version, 0);
        assert_eq!(blog.status, "current");
        assert!(blog.body_id.is_none());
    }

    #[test]
    fn body_keeps_markup_verbatim() {
        let records = parse_entities(SAMPLE).expect("parse");
        assert_eq!(records.bodies[0].body, "<p>Hello &amp; welcome</p>");
    }

    #[test]
    fn rejects_foreign_root() {
        let error = parse_entities("<html><body/></html>").expect_err("must fail");
        let structural = error
            .downcast_ref::<StructuralError>()
            .expect("structural error");
        assert_eq!(
            structural,
            &StructuralError::UnrecognizedRoot("html".to_string())
        );
    }

    #[test]
    fn rejects_parent_of_unknown_class() {
        let xml = r#"<hibernate-generic>
  <object class="Page"><id name="id">1</id>
    <property name="parent" class="Space"><id name="id">9</id></property>
  </object>
</hibernate-generic>"#;
        let error = parse_entities(xml).expect_err("must fail");
        assert!(error.to_string().contains("unknown record class `Space`"));
    }

    #[test]
    fn rejects_non_numeric_version() {
        let xml = r#"<hibernate-generic>
  <object class="Page"><id name="id">1</id><property name="version">two</property></object>
</hibernate-generic>"#;
        let error = parse_entities(xml).expect_err("must fail");
        assert!(error.to_string().contains("malformed `version`"));
    }
}
