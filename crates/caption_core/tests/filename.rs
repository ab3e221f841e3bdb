use caption_core::{local_filename, sanitize_filename, url_basename, FilenameClaims};

#[test]
fn sanitize_strips_punctuation_and_spaces_from_stem() {
    assert_eq!(sanitize_filename("my pic!#1.JPEG"), "mypic1.JPEG");
    assert_eq!(sanitize_filename("cat_photo-2.png"), "cat_photo-2.png");
    assert_eq!(sanitize_filename("a.b.c"), "ab.c");
}

#[test]
fn sanitize_keeps_extension_untouched() {
    assert_eq!(sanitize_filename("img(1).j pg"), "img1.j pg");
    assert_eq!(sanitize_filename("no_extension!"), "no_extension");
}

#[test]
fn sanitize_handles_empty_and_stemless_names() {
    assert_eq!(sanitize_filename(""), "");
    assert_eq!(sanitize_filename("!!!.png"), ".png");
    assert_eq!(sanitize_filename(".png"), ".png");
}

#[test]
fn sanitize_keeps_unicode_word_characters() {
    assert_eq!(sanitize_filename("café au lait.jpg"), "caféaulait.jpg");
    assert_eq!(sanitize_filename("東京 タワー.png"), "東京タワー.png");
}

#[test]
fn sanitize_is_idempotent() {
    let inputs = [
        "my pic!#1.JPEG",
        "",
        ".png",
        "!!!.png",
        "a.b.c",
        "..hidden..jpg",
        "x%20y%2Fz.jpg",
        "weird name (copy).tar.gz",
        "trailing.",
        "-_-.png",
    ];
    for input in inputs {
        let once = sanitize_filename(input);
        let twice = sanitize_filename(&once);
        assert_eq!(once, twice, "not idempotent for {input:?}");
    }
}

#[test]
fn basename_is_text_after_last_slash() {
    assert_eq!(url_basename("http://x/a.jpg"), "a.jpg");
    assert_eq!(url_basename("https://cdn.example.com/p/q/r%20s.png"), "r%20s.png");
    assert_eq!(url_basename("http://x/dir/"), "");
    assert_eq!(url_basename("plain.jpg"), "plain.jpg");
}

#[test]
fn local_filename_combines_basename_and_sanitize() {
    assert_eq!(local_filename("http://x/a.jpg"), "a.jpg");
    assert_eq!(
        local_filename("https://img.example.com/photos/my%20pic!.png"),
        "my20pic.png"
    );
}

#[test]
fn claims_reject_duplicates_and_empty_names() {
    let mut claims = FilenameClaims::new();
    assert!(claims.claim("a.jpg"));
    assert!(!claims.claim("a.jpg"));
    assert!(claims.claim("b.jpg"));
    assert!(!claims.claim(""));
    assert_eq!(claims.len(), 2);
}
