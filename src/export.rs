//! File exports of the reconciled product set
//!
//! Every sync writes the full set to disk next to the database: a pretty
//! JSON array for downstream tooling and a flat XML document for the shop
//! import. Both writes go through a temp file and rename so a crash never
//! leaves a half-written export behind.

use crate::error::Result;
use crate::reconcile::ReconciledProduct;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Write the product set as a pretty-printed JSON array
pub fn save_json(products: &[ReconciledProduct], path: &Path) -> Result<()> {
    let body = serde_json::to_vec_pretty(products)?;
    write_atomic(path, &body)?;
    log::info!("Wrote {} products to {}", products.len(), path.display());
    Ok(())
}

/// Write the product set as a flat XML document
pub fn save_xml(products: &[ReconciledProduct], path: &Path) -> Result<()> {
    let mut body = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<products>\n");
    for product in products {
        body.push_str("  <product>\n");
        push_element(&mut body, "id", &product.id);
        push_element(&mut body, "code", &product.code);
        push_element(&mut body, "article", &product.article);
        push_element(&mut body, "pathName", &product.path_name);
        push_element(&mut body, "name", &product.name);
        push_element(&mut body, "description", &product.description);
        push_element(&mut body, "salePrice", &product.sale_price.to_string());
        push_element(&mut body, "stores", &product.stores);
        push_element(&mut body, "stock", &product.stock.to_string());
        push_element(&mut body, "updated", &product.updated);
        body.push_str("  </product>\n");
    }
    body.push_str("</products>\n");

    write_atomic(path, body.as_bytes())?;
    log::info!("Wrote {} products to {}", products.len(), path.display());
    Ok(())
}

fn push_element(body: &mut String, tag: &str, text: &str) {
    body.push_str("    <");
    body.push_str(tag);
    body.push('>');
    body.push_str(&escape_xml(text));
    body.push_str("</");
    body.push_str(tag);
    body.push_str(">\n");
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(body)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
