use git_annotate::ChangeType;
use git_annotate::document::{parse_document, serialize, writer};
use git_annotate::review::{
    Attachment, AttachmentData, CommentDraft, FileReviewState, LineRange, Provenance,
    ReviewModel, ReviewState, Side, Suggestion,
};

fn model() -> ReviewModel {
    ReviewModel::new(vec![
        FileReviewState::new("src/lib.rs", ChangeType::Modified),
        FileReviewState::new("docs/notes & todo.md", ChangeType::Added),
        FileReviewState::new("old.txt", ChangeType::Deleted),
    ])
}

fn git_state(model: &ReviewModel) -> ReviewState {
    ReviewState::new(
        Provenance::Git {
            diff_args: "main..HEAD --cached".to_string(),
            repository: "/work/repo".to_string(),
        },
        model,
    )
}

#[test]
fn special_characters_are_escaped_and_restored() {
    let body = r#"Use <X> & "y""#;
    let model = model().add_comment(CommentDraft::new("src/lib.rs", body));

    let text = serialize(&git_state(&model)).unwrap();
    assert!(text.contains("Use &lt;X&gt; &amp; &quot;y&quot;"));

    let doc = parse_document(&text).unwrap();
    assert_eq!(doc.comments.len(), 1);
    assert_eq!(doc.comments[0].body, body);
}

#[test]
fn mixed_comments_survive_a_round_trip() {
    let model = model()
        .add_comment(
            CommentDraft::new("src/lib.rs", "first line\nsecond\tline\r\nthird")
                .with_range(LineRange::new(Side::New, 10, 14).unwrap())
                .with_category("bug")
                .with_suggestion(Suggestion {
                    original_code: "if a < b {".to_string(),
                    proposed_code: "if a <= b {\n    // 'inclusive'".to_string(),
                }),
        )
        .add_comment(
            CommentDraft::new("src/lib.rs", "gone")
                .with_range(LineRange::single(Side::Old, 3)),
        )
        .add_comment(CommentDraft::new("docs/notes & todo.md", "whole file"))
        .toggle_viewed("old.txt");

    let text = serialize(&git_state(&model)).unwrap();
    let doc = parse_document(&text).unwrap();

    assert_eq!(
        doc.provenance,
        Provenance::Git {
            diff_args: "main..HEAD --cached".to_string(),
            repository: "/work/repo".to_string(),
        }
    );
    assert!(doc.timestamp.is_some());

    let paths: Vec<_> = doc.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, ["src/lib.rs", "docs/notes & todo.md", "old.txt"]);
    assert_eq!(doc.files[2].change_type, ChangeType::Deleted);
    assert!(doc.files[2].viewed);
    assert!(!doc.files[0].viewed);

    let ranged = &doc.comments[0];
    assert_eq!(ranged.body, "first line\nsecond\tline\r\nthird");
    assert_eq!(ranged.line_range, LineRange::new(Side::New, 10, 14));
    assert_eq!(ranged.category.as_deref(), Some("bug"));
    let suggestion = ranged.suggestion.as_ref().unwrap();
    assert_eq!(suggestion.original_code, "if a < b {");
    assert_eq!(suggestion.proposed_code, "if a <= b {\n    // 'inclusive'");

    assert_eq!(doc.comments[1].line_range, Some(LineRange::single(Side::Old, 3)));
    assert_eq!(doc.comments[1].category, None);

    assert_eq!(doc.comments[2].file_path, "docs/notes & todo.md");
    assert_eq!(doc.comments[2].line_range, None);
}

#[test]
fn comment_ids_are_minted_fresh_on_load() {
    let model = model().add_comment(CommentDraft::new("src/lib.rs", "x"));
    let original_id = model.comments_for_file("src/lib.rs")[0].id.clone();

    let text = serialize(&git_state(&model)).unwrap();
    let first = parse_document(&text).unwrap();
    let second = parse_document(&text).unwrap();

    assert_ne!(first.comments[0].id, original_id);
    assert_ne!(first.comments[0].id, second.comments[0].id);
}

#[test]
fn directory_provenance_round_trips() {
    let state = ReviewState::new(
        Provenance::Directory {
            source_path: "/tmp/drafts".to_string(),
        },
        &model(),
    );
    let doc = parse_document(&serialize(&state).unwrap()).unwrap();
    assert_eq!(
        doc.provenance,
        Provenance::Directory {
            source_path: "/tmp/drafts".to_string()
        }
    );
}

#[test]
fn attachments_are_written_beside_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("review.xml");
    let model = model().add_comment(
        CommentDraft::new("src/lib.rs", "see screenshot").with_attachment(Attachment {
            media_type: "image/png".to_string(),
            data: AttachmentData::Bytes(vec![0x89, b'P', b'N', b'G']),
        }),
    );

    writer::write_document(&git_state(&model), &output).unwrap();

    let doc = parse_document(&std::fs::read_to_string(&output).unwrap()).unwrap();
    let attachment = &doc.comments[0].attachments[0];
    assert_eq!(attachment.media_type, "image/png");
    let AttachmentData::Path(relative) = &attachment.data else {
        panic!("expected a path reference");
    };
    assert!(relative.ends_with(".png"));
    assert_eq!(
        std::fs::read(dir.path().join(relative)).unwrap(),
        vec![0x89, b'P', b'N', b'G']
    );
}

#[test]
fn documents_without_review_root_are_rejected() {
    assert!(parse_document("<notes/>").is_err());
    assert!(parse_document("not xml at all").is_err());
}

#[test]
fn control_characters_do_not_break_saving() {
    let model = model().add_comment(
        CommentDraft::new("src/lib.rs", "color code \u{1b}[31m red\u{0}")
            .with_category("bell\u{7}"),
    );

    let text = serialize(&git_state(&model)).unwrap();
    let doc = parse_document(&text).unwrap();

    assert_eq!(doc.comments[0].body, "color code \u{FFFD}[31m red\u{FFFD}");
    assert_eq!(doc.comments[0].category.as_deref(), Some("bell\u{FFFD}"));
}
