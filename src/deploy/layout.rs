//! Deploy segment locator.
//!
//! An engine reserves room for the application with a fixed run of
//! segments at the end of its file:
//!
//! ```text
//! [__PAYLOAD] __PROJECT [__MISC] __LINKEDIT
//! ```
//!
//! Nothing but `__LINKEDIT` may follow `__PROJECT` (or `__MISC`), and no
//! segment of any kind may follow `__LINKEDIT`.

use crate::error::{Error, Result};
use crate::macho::LoadCommand;

/// Name of the optional payload segment.
pub const PAYLOAD_SEGMENT: &str = "__PAYLOAD";
/// Name of the project segment.
pub const PROJECT_SEGMENT: &str = "__PROJECT";
/// Name of the legacy segment allowed between project and link-edit.
pub const MISC_SEGMENT: &str = "__MISC";
/// Name of the link-edit segment.
pub const LINKEDIT_SEGMENT: &str = "__LINKEDIT";

/// Command indices of the deploy segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    /// `__PAYLOAD`, if the engine has one
    pub payload: Option<usize>,
    /// `__PROJECT`
    pub project: usize,
    /// `__MISC`, if it sits between `__PROJECT` and `__LINKEDIT`
    pub misc: Option<usize>,
    /// `__LINKEDIT`
    pub linkedit: usize,
}

impl SegmentLayout {
    /// Finds the deploy segments and checks their order.
    ///
    /// `require_payload` is set when a non-empty payload is being deployed.
    pub fn locate(commands: &[LoadCommand], require_payload: bool) -> Result<Self> {
        // (command index, name) of every segment command, in file order;
        // segments of the other width have no decoded name
        let segments: Vec<(usize, Option<&str>)> = commands
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_segment())
            .map(|(i, c)| (i, c.segment().map(|s| s.name())))
            .collect();
        let position = |name: &str| segments.iter().position(|&(_, n)| n == Some(name));

        let linkedit = position(LINKEDIT_SEGMENT).ok_or(Error::NoLinkEditSegment)?;
        let project = position(PROJECT_SEGMENT).ok_or(Error::NoProjectSegment)?;
        let payload = position(PAYLOAD_SEGMENT);
        if require_payload && payload.is_none() {
            return Err(Error::NoPayloadSegment);
        }

        let misc = match position(MISC_SEGMENT) {
            Some(misc) if misc == project + 1 && linkedit == project + 2 => Some(misc),
            _ if linkedit == project + 1 => None,
            _ => {
                return Err(Error::BadSegmentOrder {
                    reason: "__PROJECT must immediately precede __LINKEDIT or __MISC",
                })
            }
        };

        if let Some(payload) = payload {
            if payload + 1 != project {
                return Err(Error::BadSegmentOrder {
                    reason: "__PAYLOAD must immediately precede __PROJECT",
                });
            }
        }

        if linkedit + 1 != segments.len() {
            return Err(Error::BadSegmentOrder {
                reason: "no segment may follow __LINKEDIT",
            });
        }

        let index = |position: usize| segments[position].0;
        Ok(Self {
            payload: payload.map(index),
            project: index(project),
            misc: misc.map(index),
            linkedit: index(linkedit),
        })
    }

    /// The first segment whose contents move with the link-edit data.
    #[inline]
    pub fn pivot(&self) -> usize {
        self.misc.unwrap_or(self.linkedit)
    }

    /// The first segment whose contents are replaced.
    #[inline]
    pub fn injection(&self) -> usize {
        self.payload.unwrap_or(self.project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macho::MachImage;
    use crate::testutil::EngineBuilder;

    fn locate(builder: EngineBuilder, require_payload: bool) -> Result<SegmentLayout> {
        let image = MachImage::parse(&builder.build()).unwrap();
        SegmentLayout::locate(&image.commands, require_payload)
    }

    #[test]
    fn test_project_only() {
        let layout = locate(EngineBuilder::new(), false).unwrap();
        assert_eq!(layout.payload, None);
        assert_eq!(layout.misc, None);
        assert_eq!(layout.linkedit, layout.project + 1);
        assert_eq!(layout.pivot(), layout.linkedit);
        assert_eq!(layout.injection(), layout.project);
    }

    #[test]
    fn test_payload_project_misc() {
        let builder = EngineBuilder::new().middle(&["__PAYLOAD", "__PROJECT", "__MISC"]);
        let layout = locate(builder, true).unwrap();
        assert_eq!(layout.payload, Some(layout.project - 1));
        assert_eq!(layout.misc, Some(layout.project + 1));
        assert_eq!(layout.pivot(), layout.project + 1);
        assert_eq!(layout.injection(), layout.project - 1);
    }

    #[test]
    fn test_missing_segments() {
        let no_project = EngineBuilder::new().middle(&["__DATA"]);
        assert!(matches!(locate(no_project, false), Err(Error::NoProjectSegment)));

        assert!(matches!(
            locate(EngineBuilder::new(), true),
            Err(Error::NoPayloadSegment)
        ));
    }

    #[test]
    fn test_project_not_adjacent_to_linkedit() {
        let builder = EngineBuilder::new().middle(&["__PROJECT", "__DATA"]);
        assert!(matches!(locate(builder, false), Err(Error::BadSegmentOrder { .. })));

        // __MISC is only tolerated directly between the two
        let builder = EngineBuilder::new().middle(&["__MISC", "__PROJECT", "__DATA"]);
        assert!(matches!(locate(builder, false), Err(Error::BadSegmentOrder { .. })));
    }

    #[test]
    fn test_payload_not_adjacent_to_project() {
        let builder = EngineBuilder::new().middle(&["__PAYLOAD", "__DATA", "__PROJECT"]);
        assert!(matches!(locate(builder, false), Err(Error::BadSegmentOrder { .. })));
    }

    #[test]
    fn test_segment_after_linkedit() {
        let builder = EngineBuilder::new().segment_after_linkedit(true);
        assert!(matches!(locate(builder, false), Err(Error::BadSegmentOrder { .. })));
    }
}
