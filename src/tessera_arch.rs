//! An abstraction which represents the units that are associated with a team.
//!
//! Every team carries an arch describing its membership relative to the
//! parent team; chaining arches through their parents converts between
//! team-local and global (root team) unit ids without communication.

use crate::unit_group::UnitGroup;
use std::sync::Arc;

/// Membership of a team, expressed in the id space of its parent team.
pub trait TeamArch: Send + Sync {
    /// The number of units in the team defined by this arch.
    fn num_units(&self) -> usize;
    /// The id of the first (lowest numbered) unit, in parent ids.
    fn start_unit(&self) -> usize;
    /// The id of the last (highest numbered) unit, in parent ids.
    fn end_unit(&self) -> usize;
    /// Converts a team unit id into the id space of the parent team.
    ///
    /// Returns an error if the unit does not exist in the team.
    fn parent_unit_id(&self, team_unit: usize) -> ArchResult<usize>;
    /// Converts a parent team unit id into this team's id space.
    ///
    /// Returns an error if the unit does not exist in the team.
    fn team_unit_id(&self, parent_unit: usize) -> ArchResult<usize>;
}

/// An error that occurs when converting between ids of a team and its parent.
#[derive(Debug, Clone, Copy)]
pub struct IdError {
    pub parent_unit: usize,
    pub team_unit: usize,
}

pub(crate) type ArchResult<T> = Result<T, IdError>;

impl std::fmt::Display for IdError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "invalid id => parent_unit: {} team_unit: {}",
            self.parent_unit, self.team_unit
        )
    }
}

impl std::error::Error for IdError {}

#[derive(Clone, Debug)]
pub(crate) enum TeamArchEnum {
    Global(GlobalArch),
    Blocked(BlockedArch),
    List(ListArch),
}

impl TeamArch for TeamArchEnum {
    fn num_units(&self) -> usize {
        match self {
            TeamArchEnum::Global(arch) => arch.num_units(),
            TeamArchEnum::Blocked(arch) => arch.num_units(),
            TeamArchEnum::List(arch) => arch.num_units(),
        }
    }
    fn start_unit(&self) -> usize {
        match self {
            TeamArchEnum::Global(arch) => arch.start_unit(),
            TeamArchEnum::Blocked(arch) => arch.start_unit(),
            TeamArchEnum::List(arch) => arch.start_unit(),
        }
    }
    fn end_unit(&self) -> usize {
        match self {
            TeamArchEnum::Global(arch) => arch.end_unit(),
            TeamArchEnum::Blocked(arch) => arch.end_unit(),
            TeamArchEnum::List(arch) => arch.end_unit(),
        }
    }
    fn parent_unit_id(&self, team_unit: usize) -> ArchResult<usize> {
        match self {
            TeamArchEnum::Global(arch) => arch.parent_unit_id(team_unit),
            TeamArchEnum::Blocked(arch) => arch.parent_unit_id(team_unit),
            TeamArchEnum::List(arch) => arch.parent_unit_id(team_unit),
        }
    }
    fn team_unit_id(&self, parent_unit: usize) -> ArchResult<usize> {
        match self {
            TeamArchEnum::Global(arch) => arch.team_unit_id(parent_unit),
            TeamArchEnum::Blocked(arch) => arch.team_unit_id(parent_unit),
            TeamArchEnum::List(arch) => arch.team_unit_id(parent_unit),
        }
    }
}

impl TeamArchEnum {
    /// Pick the cheapest representation for a sorted member list (in parent
    /// ids): a contiguous run collapses to a [`BlockedArch`].
    pub(crate) fn from_sorted_units(units: &[usize]) -> TeamArchEnum {
        assert!(!units.is_empty(), "a team arch needs at least one unit");
        let contiguous = units.windows(2).all(|w| w[1] == w[0] + 1);
        if contiguous {
            TeamArchEnum::Blocked(BlockedArch::new(units[0], units.len()))
        } else {
            TeamArchEnum::List(ListArch::new(units.to_vec()))
        }
    }
}

/// The runtime arch chain: membership of a team plus the link to its parent.
#[derive(Debug, Clone)]
pub(crate) struct TeamArchRT {
    pub(crate) parent: Option<Arc<TeamArchRT>>,
    pub(crate) arch: TeamArchEnum,
    pub(crate) num_units: usize,
}

impl TeamArchRT {
    pub(crate) fn new_root(num_units: usize) -> TeamArchRT {
        TeamArchRT {
            parent: None,
            arch: TeamArchEnum::Global(GlobalArch::new(num_units)),
            num_units,
        }
    }

    pub(crate) fn new(parent: Arc<TeamArchRT>, arch: TeamArchEnum) -> TeamArchRT {
        assert!(
            arch.num_units() <= parent.num_units(),
            "cannot have more units in a subteam than in its parent"
        );
        TeamArchRT {
            num_units: arch.num_units(),
            arch,
            parent: Some(parent),
        }
    }

    pub(crate) fn num_units(&self) -> usize {
        self.num_units
    }

    /// Global (root team) id of `team_unit`.
    pub(crate) fn global_unit(&self, team_unit: usize) -> ArchResult<usize> {
        let parent_unit = self.arch.parent_unit_id(team_unit)?;
        if let Some(parent) = &self.parent {
            parent.global_unit(parent_unit)
        } else {
            Ok(parent_unit)
        }
    }

    /// Team-local id of the global unit `global_unit`.
    pub(crate) fn team_unit(&self, global_unit: usize) -> ArchResult<usize> {
        if let Some(parent) = &self.parent {
            let parent_unit = parent.team_unit(global_unit)?;
            self.arch.team_unit_id(parent_unit)
        } else {
            self.arch.team_unit_id(global_unit)
        }
    }

    /// The member global ids, ascending in team-unit order.
    pub(crate) fn unit_iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_units).map(move |u| self.global_unit(u).expect("dense team ids"))
    }

    /// The membership as a group of global ids.
    pub(crate) fn to_group(&self) -> UnitGroup {
        UnitGroup::from_units(self.unit_iter())
    }
}

/// The root team arch: all units, identity conversions.
#[derive(Copy, Clone, std::hash::Hash, Debug)]
pub struct GlobalArch {
    pub(crate) num_units: usize,
}

impl GlobalArch {
    pub fn new(num_units: usize) -> GlobalArch {
        GlobalArch { num_units }
    }
}

impl TeamArch for GlobalArch {
    fn num_units(&self) -> usize {
        self.num_units
    }
    fn start_unit(&self) -> usize {
        0
    }
    fn end_unit(&self) -> usize {
        self.num_units - 1
    }
    fn parent_unit_id(&self, team_unit: usize) -> ArchResult<usize> {
        if team_unit < self.num_units {
            Ok(team_unit)
        } else {
            Err(IdError {
                parent_unit: team_unit,
                team_unit,
            })
        }
    }
    fn team_unit_id(&self, parent_unit: usize) -> ArchResult<usize> {
        if parent_unit < self.num_units {
            Ok(parent_unit)
        } else {
            Err(IdError {
                parent_unit,
                team_unit: parent_unit,
            })
        }
    }
}

/// A contiguous run of parent units.
#[derive(Copy, Clone, std::hash::Hash, Debug)]
pub struct BlockedArch {
    pub(crate) num_units: usize,
    pub(crate) start_unit: usize, //with respect to the parent arch (inclusive)
    pub(crate) end_unit: usize,   //with respect to the parent arch (inclusive)
}

impl BlockedArch {
    /// Construct from a starting unit and the number of units in the block.
    pub fn new(start_unit: usize, num_team_units: usize) -> BlockedArch {
        BlockedArch {
            num_units: num_team_units,
            start_unit,
            end_unit: start_unit + num_team_units - 1,
        }
    }
}

impl TeamArch for BlockedArch {
    fn num_units(&self) -> usize {
        self.num_units
    }
    fn start_unit(&self) -> usize {
        self.start_unit
    }
    fn end_unit(&self) -> usize {
        self.end_unit
    }
    fn parent_unit_id(&self, team_unit: usize) -> ArchResult<usize> {
        let parent_unit = self.start_unit + team_unit;
        if team_unit < self.num_units {
            Ok(parent_unit)
        } else {
            Err(IdError {
                parent_unit,
                team_unit,
            })
        }
    }
    fn team_unit_id(&self, parent_unit: usize) -> ArchResult<usize> {
        if parent_unit >= self.start_unit && parent_unit <= self.end_unit {
            Ok(parent_unit - self.start_unit)
        } else {
            Err(IdError {
                parent_unit,
                team_unit: 0,
            })
        }
    }
}

/// An explicit sorted member list, for teams built from arbitrary groups.
#[derive(Clone, Debug)]
pub struct ListArch {
    units: Vec<usize>, //sorted, with respect to the parent arch
}

impl ListArch {
    pub fn new(mut units: Vec<usize>) -> ListArch {
        units.sort_unstable();
        units.dedup();
        ListArch { units }
    }
}

impl TeamArch for ListArch {
    fn num_units(&self) -> usize {
        self.units.len()
    }
    fn start_unit(&self) -> usize {
        self.units[0]
    }
    fn end_unit(&self) -> usize {
        self.units[self.units.len() - 1]
    }
    fn parent_unit_id(&self, team_unit: usize) -> ArchResult<usize> {
        match self.units.get(team_unit) {
            Some(parent_unit) => Ok(*parent_unit),
            None => Err(IdError {
                parent_unit: 0,
                team_unit,
            }),
        }
    }
    fn team_unit_id(&self, parent_unit: usize) -> ArchResult<usize> {
        match self.units.binary_search(&parent_unit) {
            Ok(team_unit) => Ok(team_unit),
            Err(_) => Err(IdError {
                parent_unit,
                team_unit: 0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn global_arch() {
        let garch = Arc::new(TeamArchRT::new_root(10));
        assert_eq!(10, garch.num_units());
        assert_eq!(
            (0..10).collect::<Vec<usize>>(),
            garch.unit_iter().collect::<Vec<usize>>()
        );
        assert_eq!(garch.team_unit(3).unwrap(), 3);
        assert!(garch.team_unit(10).is_err());
    }

    #[test]
    fn sub_arch_blocked() {
        let garch = Arc::new(TeamArchRT::new_root(10));
        let arch = Arc::new(TeamArchRT::new(
            garch.clone(),
            TeamArchEnum::from_sorted_units(&[4, 5, 6, 7]),
        ));
        assert!(matches!(arch.arch, TeamArchEnum::Blocked(_)));
        assert_eq!(4, arch.num_units());
        assert_eq!(
            vec![4, 5, 6, 7],
            arch.unit_iter().collect::<Vec<usize>>()
        );
        assert_eq!(arch.team_unit(6).unwrap(), 2);
        assert!(arch.team_unit(3).is_err());
    }

    #[test]
    fn sub_arch_list() {
        let garch = Arc::new(TeamArchRT::new_root(10));
        let arch = Arc::new(TeamArchRT::new(
            garch.clone(),
            TeamArchEnum::from_sorted_units(&[1, 4, 9]),
        ));
        assert!(matches!(arch.arch, TeamArchEnum::List(_)));
        assert_eq!(vec![1, 4, 9], arch.unit_iter().collect::<Vec<usize>>());
        assert_eq!(arch.team_unit(9).unwrap(), 2);
        assert_eq!(arch.global_unit(1).unwrap(), 4);
        assert!(arch.global_unit(3).is_err());
    }

    #[test]
    fn multi_level_sub_arches() {
        let garch = Arc::new(TeamArchRT::new_root(20));
        let first_half = Arc::new(TeamArchRT::new(
            garch.clone(),
            TeamArchEnum::from_sorted_units(&(0..10).collect::<Vec<usize>>()),
        ));
        // the nested arch is expressed in the parent's (first_half) id space
        let evens_of_half = Arc::new(TeamArchRT::new(
            first_half.clone(),
            TeamArchEnum::from_sorted_units(&[0, 2, 4, 6, 8]),
        ));
        assert_eq!(
            vec![0, 2, 4, 6, 8],
            evens_of_half.unit_iter().collect::<Vec<usize>>()
        );
        assert_eq!(evens_of_half.team_unit(4).unwrap(), 2);
        assert!(evens_of_half.team_unit(1).is_err());
    }
}
