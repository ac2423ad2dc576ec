//! Course document parsing and chunking.
//!
//! A course document is plain text with a small header followed by lesson
//! sections:
//!
//! ```text
//! Course Title: Building Towards Computer Use
//! Course Link: https://example.com/course
//! Course Instructor: Colt Steele
//!
//! Lesson 0: Introduction
//! Lesson Link: https://example.com/course/lesson0
//! Welcome to ...
//! ```

use std::path::Path;
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::models::{Course, CourseChunk, Lesson};
use crate::core::config::defaults;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters
    pub chunk_size: usize,
    /// Characters of trailing sentences repeated at the start of the next chunk
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            chunk_overlap: defaults::CHUNK_OVERLAP,
        }
    }
}

pub struct DocumentProcessor {
    config: ChunkingConfig,
}

static LESSON_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^lesson\s+(\d+)\s*:\s*(.*)$").unwrap());

impl DocumentProcessor {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Reads and parses a course document from disk.
    ///
    /// Invalid UTF-8 sequences are replaced rather than rejected.
    pub fn process_course_document(
        &self,
        path: &Path,
    ) -> anyhow::Result<(Course, Vec<CourseChunk>)> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(self.process_course_text(&text, &fallback_title(path)))
    }

    /// Parses a course document that is already in memory.
    ///
    /// `fallback_title` is used when the document has no `Course Title:` line.
    pub fn process_course_text(
        &self,
        text: &str,
        fallback_title: &str,
    ) -> (Course, Vec<CourseChunk>) {
        let lines: Vec<&str> = text.lines().collect();
        let body_start = lines
            .iter()
            .position(|line| LESSON_HEADER.is_match(line.trim()))
            .unwrap_or(lines.len());

        let mut course = Course {
            title: fallback_title.to_string(),
            course_link: None,
            instructor: None,
            lessons: Vec::new(),
        };
        let mut preamble = Vec::new();

        for line in &lines[..body_start] {
            let trimmed = line.trim();
            if let Some(value) = header_value(trimmed, "Course Title:") {
                course.title = value;
            } else if let Some(value) = header_value(trimmed, "Course Link:") {
                course.course_link = Some(value);
            } else if let Some(value) = header_value(trimmed, "Course Instructor:") {
                course.instructor = Some(value);
            } else if !trimmed.is_empty() {
                preamble.push(trimmed);
            }
        }

        let mut chunks = Vec::new();

        if body_start == lines.len() {
            // No lesson markers: keep whatever text followed the header as
            // course-level content.
            let text = preamble.join("\n");
            for piece in self.chunk_text(&text) {
                chunks.push(CourseChunk {
                    content: piece,
                    course_title: course.title.clone(),
                    lesson_number: None,
                    chunk_index: chunks.len(),
                });
            }
            return (course, chunks);
        }

        let mut current: Option<(Lesson, Vec<&str>)> = None;
        let mut index = body_start;
        while index < lines.len() {
            let trimmed = lines[index].trim();

            if let Some(caps) = LESSON_HEADER.captures(trimmed) {
                if let Some((lesson, body)) = current.take() {
                    self.finish_lesson(&mut course, lesson, &body, &mut chunks);
                }

                let lesson_number = caps[1].parse::<u32>().ok();
                if lesson_number.is_none() {
                    tracing::warn!(
                        "Course '{}': lesson number {} is out of range; skipping its section",
                        course.title,
                        &caps[1]
                    );
                }
                let title = caps[2].trim().to_string();

                let mut lesson_link = None;
                if let Some(next) = lines.get(index + 1) {
                    if let Some(link) = header_value(next.trim(), "Lesson Link:") {
                        lesson_link = Some(link);
                        index += 1;
                    }
                }

                current = lesson_number.map(|lesson_number| {
                    (
                        Lesson {
                            lesson_number,
                            title,
                            lesson_link,
                        },
                        Vec::new(),
                    )
                });
            } else if let Some((_, body)) = current.as_mut() {
                body.push(trimmed);
            }

            index += 1;
        }

        if let Some((lesson, body)) = current.take() {
            self.finish_lesson(&mut course, lesson, &body, &mut chunks);
        }

        (course, chunks)
    }

    /// Records a lesson and chunks its body. Every lesson goes through this
    /// path so the context prefix cannot differ by position.
    fn finish_lesson(
        &self,
        course: &mut Course,
        lesson: Lesson,
        body: &[&str],
        chunks: &mut Vec<CourseChunk>,
    ) {
        let text = body.join("\n");
        for (position, piece) in self.chunk_text(&text).into_iter().enumerate() {
            chunks.push(CourseChunk {
                content: with_lesson_context(lesson.lesson_number, position, piece),
                course_title: course.title.clone(),
                lesson_number: Some(lesson.lesson_number),
                chunk_index: chunks.len(),
            });
        }

        match course
            .lessons
            .iter_mut()
            .find(|existing| existing.lesson_number == lesson.lesson_number)
        {
            Some(existing) => {
                tracing::warn!(
                    "Course '{}' repeats lesson {}; merging it into the first occurrence",
                    course.title,
                    lesson.lesson_number
                );
                if existing.lesson_link.is_none() {
                    existing.lesson_link = lesson.lesson_link;
                }
            }
            None => course.lessons.push(lesson),
        }
    }

    /// Splits text into sentence-aligned chunks of at most `chunk_size`
    /// characters (a single longer sentence becomes its own chunk).
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let sentences = split_sentences(&normalized);
        let chunk_size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < sentences.len() {
            let mut size = 0;
            let mut end = start;
            while end < sentences.len() {
                let addition = char_len(sentences[end]) + usize::from(end > start);
                if end > start && size + addition > chunk_size {
                    break;
                }
                size += addition;
                end += 1;
            }

            chunks.push(sentences[start..end].join(" "));
            if end == sentences.len() {
                break;
            }

            let mut overlap_size = 0;
            let mut overlap_count = 0;
            for sentence in sentences[start..end].iter().rev() {
                let len = char_len(sentence) + usize::from(overlap_count > 0);
                if overlap_size + len > overlap {
                    break;
                }
                overlap_size += len;
                overlap_count += 1;
            }

            start = (end - overlap_count).max(start + 1);
        }

        chunks
    }
}

impl Default for DocumentProcessor {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

fn with_lesson_context(lesson_number: u32, position: usize, chunk: String) -> String {
    if position == 0 {
        format!("Lesson {} content: {}", lesson_number, chunk)
    } else {
        chunk
    }
}

fn header_value(line: &str, prefix: &str) -> Option<String> {
    let head = line.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let value = line[prefix.len()..].trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn fallback_title(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "Untitled Course".to_string())
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits whitespace-normalised text into sentences. A boundary is a word
/// ending in `.`, `!` or `?` followed by a capitalised word, except after
/// short abbreviations such as `Dr.` or `e.g.`.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut sentence_start = 0;
    let mut offset = 0;
    let words: Vec<&str> = text.split(' ').collect();

    for (i, word) in words.iter().enumerate() {
        let word_end = offset + word.len();
        let next_is_capitalised = words
            .get(i + 1)
            .and_then(|next| next.chars().next())
            .map(char::is_uppercase)
            .unwrap_or(false);

        if ends_sentence(word) && next_is_capitalised && !is_abbreviation(word) {
            let sentence = text[sentence_start..word_end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            sentence_start = word_end + 1;
        }
        offset = word_end + 1;
    }

    if sentence_start < text.len() {
        let tail = text[sentence_start..].trim();
        if !tail.is_empty() {
            sentences.push(tail);
        }
    }

    sentences
}

fn ends_sentence(word: &str) -> bool {
    matches!(word.chars().last(), Some('.' | '!' | '?'))
}

fn is_abbreviation(word: &str) -> bool {
    let chars: Vec<char> = word.chars().collect();
    match chars.as_slice() {
        // Mr. Dr. St.
        [a, b, '.'] => a.is_uppercase() && b.is_lowercase(),
        // e.g. i.e.
        [a, '.', b, '.'] => a.is_alphanumeric() && b.is_alphanumeric(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Course Title: Python Programming
Course Link: https://example.com/python
Course Instructor: Jane Doe

Lesson 1: Introduction
Lesson Link: https://example.com/python/lesson1
This is the first lesson about Python. Python is a high-level programming language. It is widely used for web development, data science, and automation.

Lesson 2: Variables and Types
Lesson Link: https://example.com/python/lesson2
Variables are containers for storing data values. Python has various data types including integers, floats, strings, and booleans.

Lesson 3: Functions
Lesson Link: https://example.com/python/lesson3
Functions are reusable blocks of code. You define functions using the def keyword.
";

    fn processor() -> DocumentProcessor {
        DocumentProcessor::new(ChunkingConfig {
            chunk_size: 800,
            chunk_overlap: 100,
        })
    }

    #[test]
    fn every_lesson_gets_the_same_prefix_format() {
        let (_, chunks) = processor().process_course_text(SAMPLE, "sample");

        for lesson in 1..=3u32 {
            let first = chunks
                .iter()
                .find(|c| c.lesson_number == Some(lesson))
                .expect("lesson has chunks");
            assert!(
                first.content.starts_with(&format!("Lesson {} content: ", lesson)),
                "unexpected prefix: {}",
                first.content
            );
            assert!(!first.content.starts_with("Course "));
        }
    }

    #[test]
    fn last_lesson_continuation_chunks_are_unprefixed_like_the_rest() {
        let processor = DocumentProcessor::new(ChunkingConfig {
            chunk_size: 60,
            chunk_overlap: 0,
        });
        let (_, chunks) = processor.process_course_text(SAMPLE, "sample");

        for lesson in 1..=3u32 {
            let lesson_chunks: Vec<_> = chunks
                .iter()
                .filter(|c| c.lesson_number == Some(lesson))
                .collect();
            assert!(lesson_chunks.len() > 1);
            for later in &lesson_chunks[1..] {
                assert!(!later.content.contains("content: "));
            }
        }
    }

    #[test]
    fn extracts_course_and_lesson_metadata() {
        let (course, _) = processor().process_course_text(SAMPLE, "sample");

        assert_eq!(course.title, "Python Programming");
        assert_eq!(course.course_link.as_deref(), Some("https://example.com/python"));
        assert_eq!(course.instructor.as_deref(), Some("Jane Doe"));
        assert_eq!(course.lessons.len(), 3);
        assert_eq!(course.lessons[0].title, "Introduction");
        assert_eq!(
            course.lessons[0].lesson_link.as_deref(),
            Some("https://example.com/python/lesson1")
        );
        assert_eq!(course.lessons[2].lesson_number, 3);
        assert_eq!(course.lessons[2].title, "Functions");
    }

    #[test]
    fn chunk_indices_are_sequential_and_titles_assigned() {
        let (_, chunks) = processor().process_course_text(SAMPLE, "sample");

        let indices: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, (0..chunks.len()).collect::<Vec<_>>());
        assert!(chunks.iter().all(|c| c.course_title == "Python Programming"));
    }

    #[test]
    fn missing_links_and_header_only_documents() {
        let text = "Course Title: No Link Course\nCourse Instructor: Test\n\nLesson 1: Test Lesson\nSome content here.\n";
        let (course, chunks) = processor().process_course_text(text, "fallback");
        assert!(course.course_link.is_none());
        assert!(course.lessons[0].lesson_link.is_none());
        assert_eq!(chunks.len(), 1);

        let (empty, chunks) = processor().process_course_text("Course Title: Empty Course\n", "x");
        assert_eq!(empty.title, "Empty Course");
        assert!(chunks.is_empty());
    }

    #[test]
    fn falls_back_to_file_stem_and_course_level_chunks() {
        let text = "Just some notes. Nothing structured here.";
        let (course, chunks) = processor().process_course_text(text, "notes");
        assert_eq!(course.title, "notes");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].lesson_number, None);
    }

    #[test]
    fn unicode_is_preserved() {
        let text = "Course Title: Unicode Course üñíçödé\nCourse Instructor: José García\n\nLesson 1: Introduction\nContent with émojis 🎉 and spëcial çhars.\n";
        let (course, chunks) = processor().process_course_text(text, "x");
        assert!(course.title.contains("üñíçödé"));
        assert_eq!(course.instructor.as_deref(), Some("José García"));
        assert!(chunks[0].content.contains("🎉"));
    }

    #[test]
    fn chunk_text_respects_size_and_overlaps() {
        let processor = processor();
        let text = "First sentence. Second sentence. Third sentence. ".repeat(50);
        let chunks = processor.chunk_text(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 800);
        }

        let numbered = (0..100)
            .map(|i| format!("Sentence number {}.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = processor.chunk_text(&numbered);
        assert!(chunks.len() > 1);
        let first_of_second = format!("{}.", chunks[1].split(". ").next().unwrap());
        assert_ne!(first_of_second, "Sentence number 0.");
        assert!(chunks[0].contains(&first_of_second));
    }

    #[test]
    fn chunk_text_always_progresses_on_long_sentences() {
        let processor = DocumentProcessor::new(ChunkingConfig {
            chunk_size: 10,
            chunk_overlap: 5,
        });
        let chunks = processor.chunk_text("Averyveryverylongsentence. Another one here.");
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn abbreviations_do_not_split_sentences() {
        let sentences = split_sentences("Ask Dr. Smith about it. Then e.g. Python works. Done.");
        assert_eq!(
            sentences,
            vec!["Ask Dr. Smith about it.", "Then e.g. Python works.", "Done."]
        );
    }

    #[test]
    fn repeated_lesson_numbers_merge_into_one_lesson() {
        let text = "Course Title: Repeats
Lesson 1: Basics
Lesson Link: https://example.com/repeats/1
Variables hold values.
Lesson 1: Basics again
Loops repeat work.
Lesson 2: Next
Functions wrap code.
";
        let (course, chunks) = processor().process_course_text(text, "x");

        let numbers: Vec<u32> = course.lessons.iter().map(|l| l.lesson_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(course.lesson(1).unwrap().title, "Basics");
        assert_eq!(
            course.lesson(1).unwrap().lesson_link.as_deref(),
            Some("https://example.com/repeats/1")
        );

        let lesson_one: Vec<_> = chunks.iter().filter(|c| c.lesson_number == Some(1)).collect();
        assert_eq!(lesson_one.len(), 2);
        assert!(lesson_one[1].content.contains("Loops repeat work."));
    }

    #[test]
    fn out_of_range_lesson_number_skips_only_that_section() {
        let text = "Course Title: Big Numbers
Lesson 99999999999: Too big
This body has no lesson to belong to.
Lesson 2: Fine
Kept content.
";
        let (course, chunks) = processor().process_course_text(text, "x");

        assert_eq!(course.lessons.len(), 1);
        assert_eq!(course.lessons[0].lesson_number, 2);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Lesson 2 content: Kept content.");
    }

    #[test]
    fn reads_documents_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("python.txt");
        std::fs::write(&path, SAMPLE).unwrap();

        let (course, chunks) = processor().process_course_document(&path).unwrap();
        assert_eq!(course.title, "Python Programming");
        assert!(!chunks.is_empty());
    }
}
