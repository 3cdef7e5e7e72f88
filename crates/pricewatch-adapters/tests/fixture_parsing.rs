use std::path::{Path, PathBuf};

use pricewatch_adapters::{
    adapter_for_source, CarrefourJsonAdapter, FetchedPage, RtMartHtmlAdapter, SourceAdapter,
    SourceKind,
};
use pricewatch_core::parse_price;

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

fn fixture(source: &str, name: &str) -> Vec<u8> {
    let path = workspace_root().join("fixtures").join(source).join("sample").join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

#[test]
fn carrefour_sample_page_parses() {
    let adapter = CarrefourJsonAdapter::new("Carrefour");
    let page = FetchedPage::new(1, "fixture://carrefour/page1", fixture("carrefour", "page1.json"));
    let parsed = adapter.parse_page(&page).unwrap();

    assert_eq!(parsed.total_count, Some(70));
    let urls: Vec<_> = parsed.candidates.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://online.carrefour.com.tw/1025001",
            "https://online.carrefour.com.tw/1025002",
            "",
        ]
    );
    assert_eq!(parse_price(&parsed.candidates[1].raw_price), Some(1299));
    assert_eq!(parsed.candidates[1].note, "1.5L x 6");
}

#[test]
fn carrefour_unavailable_page_is_empty() {
    let adapter = adapter_for_source(SourceKind::CarrefourJson, "Carrefour", None);
    let page = FetchedPage::new(
        2,
        "fixture://carrefour/unavailable",
        fixture("carrefour", "unavailable.json"),
    );
    let parsed = adapter.parse_page(&page).unwrap();
    assert!(parsed.candidates.is_empty());
    assert_eq!(parsed.total_count, None);
}

#[test]
fn rtmart_sample_listing_parses() {
    let adapter = RtMartHtmlAdapter::new("RTmart");
    let page = FetchedPage::new(1, "fixture://rtmart/listing", fixture("rtmart", "listing.html"));
    let parsed = adapter.parse_page(&page).unwrap();

    assert_eq!(parsed.total_count, Some(245));
    assert_eq!(parsed.candidates.len(), 3);

    let first = &parsed.candidates[0];
    assert_eq!(
        first.url,
        "http://www.rt-mart.com.tw/direct/index.php?action=product_detail&prod_no=P0000100000001"
    );
    assert_eq!(first.name, "Black tea 300ml x 24");
    assert_eq!(parse_price(&first.raw_price), Some(199));
    assert!(first.image_ref.ends_with("P0000100000001_1_m.jpg"));

    let gift_box = &parsed.candidates[2];
    assert!(gift_box.has_natural_key());
    assert!(gift_box.image_ref.is_empty());
    assert_eq!(parse_price(&gift_box.raw_price), None);
}
