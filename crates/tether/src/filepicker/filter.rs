//! File type filters understood by the picker plugin
//!
//! Both vocabularies are closed: the plugin only knows these keywords.

use std::fmt;
use std::str::FromStr;

/// A filter keyword that is not part of the vocabulary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} filter: {keyword}")]
pub struct UnknownFilter {
    pub kind: &'static str,
    pub keyword: String,
}

macro_rules! keyword_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $($variant:ident => $keyword:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Keyword sent to the plugin
            pub fn keyword(self) -> &'static str {
                match self {
                    $($name::$variant => $keyword,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.keyword())
            }
        }

        impl FromStr for $name {
            type Err = UnknownFilter;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_lowercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|filter| filter.keyword() == wanted)
                    .ok_or_else(|| UnknownFilter {
                        kind: $kind,
                        keyword: s.to_string(),
                    })
            }
        }
    };
}

keyword_enum! {
    /// What may be picked when loading
    LoadFilter ("load") {
        Directory => "directory",
        All => "all",
        Wav => "wav",
        Image => "image",
        Anim => "anim",
        Xml => "xml",
        SlObject => "slobject",
        Raw => "raw",
        Model => "model",
        Collada => "collada",
        Script => "script",
        Dictionary => "dictionary",
        InvGz => "invgz",
        Ao => "ao",
        Blacklist => "blacklist",
    }
}

keyword_enum! {
    /// What kind of file is being saved
    SaveFilter ("save") {
        All => "all",
        Wav => "wav",
        Tga => "tga",
        Bmp => "bmp",
        Avi => "avi",
        Anim => "anim",
        Xml => "xml",
        Collada => "collada",
        Raw => "raw",
        J2c => "j2c",
        Png => "png",
        Jpeg => "jpeg",
        Script => "script",
        Animatn => "animatn",
        Ogg => "ogg",
        Notecard => "notecard",
        Gesture => "gesture",
        Shape => "shape",
        Skin => "skin",
        Hair => "hair",
        Eyes => "eyes",
        Shirt => "shirt",
        Pants => "pants",
        Shoes => "shoes",
        Socks => "socks",
        Jacket => "jacket",
        Gloves => "gloves",
        Undershirt => "undershirt",
        Underpants => "underpants",
        Skirt => "skirt",
        InvGz => "invgz",
        Landmark => "landmark",
        Ao => "ao",
        Blacklist => "blacklist",
        Physics => "physics",
        Image => "image",
    }
}
