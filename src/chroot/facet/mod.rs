//! Composable chroot capabilities.
//!
//! A chroot carries at most one facet of each [`FacetType`]. Facets are
//! plain values, so cloning a chroot deep-clones its facets. Callers reach
//! a concrete facet through [`FacetSet::get`] with the facet's own type,
//! never by matching on the enum directly.

mod personality;
mod session;
mod source;
mod unshare;
mod userdata;

pub use personality::PersonalityFacet;
pub use session::{SessionClonable, SessionFacet};
pub use source::{SourceClonable, SourceFacet};
pub use unshare::UnshareFacet;
pub use userdata::Userdata;

use crate::chroot::keys::KeyReader;
use crate::config::keyfile::Keyfile;
use crate::config::types::{ChrootError, ChrootResult, SessionFlags};
use crate::utils::environment::Environment;

/// Facet discriminant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FacetType {
    Session,
    SessionClonable,
    Source,
    SourceClonable,
    Userdata,
    Personality,
    Unshare,
}

impl FacetType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::SessionClonable => "session-clonable",
            Self::Source => "source",
            Self::SourceClonable => "source-clonable",
            Self::Userdata => "userdata",
            Self::Personality => "personality",
            Self::Unshare => "unshare",
        }
    }
}

/// One attached facet
#[derive(Clone, Debug, PartialEq)]
pub enum Facet {
    Session(SessionFacet),
    SessionClonable(SessionClonable),
    Source(SourceFacet),
    SourceClonable(SourceClonable),
    Userdata(Userdata),
    Personality(PersonalityFacet),
    Unshare(UnshareFacet),
}

/// Typed access to a facet stored in a [`FacetSet`]
pub trait TypedFacet: Sized + Into<Facet> {
    const TYPE: FacetType;

    fn from_facet(facet: &Facet) -> Option<&Self>;
    fn from_facet_mut(facet: &mut Facet) -> Option<&mut Self>;
}

macro_rules! typed_facet {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Facet {
            fn from(facet: $ty) -> Self {
                Facet::$variant(facet)
            }
        }

        impl TypedFacet for $ty {
            const TYPE: FacetType = FacetType::$variant;

            fn from_facet(facet: &Facet) -> Option<&Self> {
                match facet {
                    Facet::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn from_facet_mut(facet: &mut Facet) -> Option<&mut Self> {
                match facet {
                    Facet::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

typed_facet!(SessionFacet, Session);
typed_facet!(SessionClonable, SessionClonable);
typed_facet!(SourceFacet, Source);
typed_facet!(SourceClonable, SourceClonable);
typed_facet!(Userdata, Userdata);
typed_facet!(PersonalityFacet, Personality);
typed_facet!(UnshareFacet, Unshare);

impl Facet {
    pub fn facet_type(&self) -> FacetType {
        match self {
            Self::Session(_) => FacetType::Session,
            Self::SessionClonable(_) => FacetType::SessionClonable,
            Self::Source(_) => FacetType::Source,
            Self::SourceClonable(_) => FacetType::SourceClonable,
            Self::Userdata(_) => FacetType::Userdata,
            Self::Personality(_) => FacetType::Personality,
            Self::Unshare(_) => FacetType::Unshare,
        }
    }

    /// Session capabilities contributed by this facet
    pub fn session_flags(&self) -> SessionFlags {
        match self {
            Self::SourceClonable(f) if f.source_clone => SessionFlags::CLONE,
            _ => SessionFlags::NOFLAGS,
        }
    }

    pub fn setup_env(&self, env: &mut Environment) {
        match self {
            Self::Session(f) => f.setup_env(env),
            Self::Source(f) => f.setup_env(env),
            Self::Userdata(f) => f.setup_env(env),
            Self::Personality(f) => f.setup_env(env),
            Self::SessionClonable(_) | Self::SourceClonable(_) | Self::Unshare(_) => {}
        }
    }

    pub fn keyfile_get(&self, keyfile: &mut Keyfile, group: &str) {
        match self {
            Self::Session(f) => f.keyfile_get(keyfile, group),
            Self::SourceClonable(f) => f.keyfile_get(keyfile, group),
            Self::Userdata(f) => f.keyfile_get(keyfile, group),
            Self::Personality(f) => f.keyfile_get(keyfile, group),
            Self::Unshare(f) => f.keyfile_get(keyfile, group),
            Self::SessionClonable(_) | Self::Source(_) => {}
        }
    }

    pub fn keyfile_set(&mut self, reader: &KeyReader<'_>) -> ChrootResult<()> {
        match self {
            Self::Session(f) => f.keyfile_set(reader),
            Self::SourceClonable(f) => f.keyfile_set(reader),
            Self::Userdata(f) => f.keyfile_set(reader),
            Self::Personality(f) => f.keyfile_set(reader),
            Self::Unshare(f) => f.keyfile_set(reader),
            Self::SessionClonable(_) | Self::Source(_) => Ok(()),
        }
    }

    pub fn used_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Session(_) => SessionFacet::KEYS,
            Self::SourceClonable(_) => SourceClonable::KEYS,
            Self::Userdata(_) => Userdata::KEYS,
            Self::Personality(_) => PersonalityFacet::KEYS,
            Self::Unshare(_) => UnshareFacet::KEYS,
            Self::SessionClonable(_) | Self::Source(_) => &[],
        }
    }
}

/// Ordered set of facets, at most one per type
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FacetSet {
    facets: Vec<Facet>,
}

impl FacetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: TypedFacet>(&self) -> Option<&T> {
        self.facets.iter().find_map(T::from_facet)
    }

    pub fn get_mut<T: TypedFacet>(&mut self) -> Option<&mut T> {
        self.facets.iter_mut().find_map(T::from_facet_mut)
    }

    pub fn contains<T: TypedFacet>(&self) -> bool {
        self.contains_type(T::TYPE)
    }

    pub fn contains_type(&self, facet_type: FacetType) -> bool {
        self.facets.iter().any(|f| f.facet_type() == facet_type)
    }

    /// Attach a facet; a second facet of the same type is rejected
    pub fn add<T: TypedFacet>(&mut self, facet: T) -> ChrootResult<()> {
        if self.contains::<T>() {
            return Err(ChrootError::FacetPresent(T::TYPE.name()));
        }
        self.facets.push(facet.into());
        Ok(())
    }

    /// Attach a facet, replacing any existing one of the same type in place
    pub fn replace<T: TypedFacet>(&mut self, facet: T) {
        let facet = facet.into();
        match self
            .facets
            .iter_mut()
            .find(|f| f.facet_type() == T::TYPE)
        {
            Some(slot) => *slot = facet,
            None => self.facets.push(facet),
        }
    }

    /// Detach a facet; true when one was present
    pub fn remove<T: TypedFacet>(&mut self) -> bool {
        let before = self.facets.len();
        self.facets.retain(|f| f.facet_type() != T::TYPE);
        self.facets.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = &Facet> {
        self.facets.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Facet> {
        self.facets.iter_mut()
    }

    pub fn types(&self) -> Vec<FacetType> {
        self.facets.iter().map(Facet::facet_type).collect()
    }

    pub fn session_flags(&self) -> SessionFlags {
        self.facets
            .iter()
            .fold(SessionFlags::NOFLAGS, |acc, f| acc | f.session_flags())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_facet_per_type() {
        let mut facets = FacetSet::new();
        facets.add(SessionClonable).unwrap();
        assert!(matches!(
            facets.add(SessionClonable),
            Err(ChrootError::FacetPresent("session-clonable"))
        ));
        assert!(facets.contains::<SessionClonable>());
        assert!(facets.remove::<SessionClonable>());
        assert!(!facets.remove::<SessionClonable>());
    }

    #[test]
    fn typed_access_and_replace() {
        let mut facets = FacetSet::new();
        facets.add(SessionFacet::new("sid", "unstable")).unwrap();
        facets.add(Userdata::default()).unwrap();

        facets.replace(SessionFacet::new("sid", "sid"));
        assert_eq!(facets.types(), vec![FacetType::Session, FacetType::Userdata]);
        assert_eq!(facets.get::<SessionFacet>().unwrap().selected_name, "sid");

        facets.get_mut::<SessionFacet>().unwrap().selected_name = "testing".into();
        assert_eq!(facets.get::<SessionFacet>().unwrap().selected_name, "testing");
        assert!(facets.get::<SourceFacet>().is_none());
    }

    #[test]
    fn source_clonable_contributes_clone_flag() {
        let mut facets = FacetSet::new();
        assert!(facets.session_flags().is_empty());
        facets.add(SourceClonable::default()).unwrap();
        assert!(facets.session_flags().contains(SessionFlags::CLONE));
        facets.get_mut::<SourceClonable>().unwrap().source_clone = false;
        assert!(facets.session_flags().is_empty());
    }
}
