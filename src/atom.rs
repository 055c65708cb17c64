//! Atom rendering for reconstructed feeds.
//!
//! A pure serializer: title, ordered entries, and a stylesheet URL in,
//! UTF-8 XML out. The stylesheet processing instruction lets browsers show
//! the document as a readable page while feed readers consume it as-is.

use quick_xml::escape::escape;

/// One rendered entry, already flattened to the four fields the output
/// carries.
#[derive(Debug, Clone)]
pub struct AtomEntry {
    pub id: String,
    pub title: String,
    /// `YYYY-MM-DDTHH:MM:SSZ`, or empty when the source gave no timestamp.
    pub published: String,
    pub link: String,
}

/// Serialize the feed. Entries are emitted in the order given; all text
/// and attribute values are XML-escaped.
pub fn render(title: &str, entries: &[AtomEntry], stylesheet: &str) -> String {
    let mut out = String::with_capacity(512 + entries.len() * 256);

    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<?xml-stylesheet href=\"{}\" type=\"text/xsl\"?>\n",
        escape(stylesheet)
    ));
    out.push_str("<feed xmlns=\"http://www.w3.org/2005/Atom\">\n");
    out.push_str(&format!("<title type=\"text\">{}</title>\n", escape(title)));

    for entry in entries {
        out.push_str(&format!(
            "<entry>\
             <published>{}</published>\
             <link rel=\"alternate\" type=\"text/html\" href=\"{}\"/>\
             <title type=\"text\">{}</title>\
             <id>{}</id>\
             </entry>\n",
            escape(&entry.published),
            escape(&entry.link),
            escape(&entry.title),
            escape(&entry.id),
        ));
    }

    out.push_str("</feed>\n");
    out
}
