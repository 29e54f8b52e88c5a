use tinyvec::TinyVec;
use ze_gfx::backend::{ResourceStates, ALL_SUBRESOURCES};

/// Resources with at most this many subresources track their states inline
pub const INLINE_SUBRESOURCE_COUNT: usize = 12;

#[derive(Clone, Debug, PartialEq)]
enum SubresourceStates {
    Common(ResourceStates),
    PerSubresource(TinyVec<[ResourceStates; INLINE_SUBRESOURCE_COUNT]>),
}

/// State of every subresource of a resource, stored as a single state while they all agree
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceState {
    subresource_count: u32,
    states: SubresourceStates,
}

impl ResourceState {
    pub fn new(subresource_count: u32, state: ResourceStates) -> Self {
        debug_assert!(subresource_count > 0);
        Self {
            subresource_count,
            states: SubresourceStates::Common(state),
        }
    }

    /// Every subresource is [`ResourceStates::UNKNOWN`]
    pub fn unknown(subresource_count: u32) -> Self {
        Self::new(subresource_count, ResourceStates::UNKNOWN)
    }

    pub fn subresource_count(&self) -> u32 {
        self.subresource_count
    }

    pub fn is_uniform(&self) -> bool {
        matches!(self.states, SubresourceStates::Common(_))
    }

    /// State of `subresource`. For [`ALL_SUBRESOURCES`], the common state when every
    /// subresource agrees and `UNKNOWN` otherwise.
    pub fn get(&self, subresource: u32) -> ResourceStates {
        match &self.states {
            SubresourceStates::Common(state) => *state,
            SubresourceStates::PerSubresource(_) if subresource == ALL_SUBRESOURCES => {
                ResourceStates::UNKNOWN
            }
            SubresourceStates::PerSubresource(states) => {
                debug_assert!(subresource < self.subresource_count);
                states[subresource as usize]
            }
        }
    }

    pub fn set(&mut self, subresource: u32, state: ResourceStates) {
        if subresource == ALL_SUBRESOURCES || self.subresource_count == 1 {
            self.states = SubresourceStates::Common(state);
            return;
        }

        assert!(
            subresource < self.subresource_count,
            "subresource {} out of range ({} subresources)",
            subresource,
            self.subresource_count
        );

        if let SubresourceStates::Common(common) = self.states {
            if common == state {
                return;
            }

            let mut states = TinyVec::new();
            states.resize(self.subresource_count as usize, common);
            self.states = SubresourceStates::PerSubresource(states);
        }

        let collapsed = match &mut self.states {
            SubresourceStates::PerSubresource(states) => {
                states[subresource as usize] = state;
                let first = states[0];
                states.iter().all(|s| *s == first).then_some(first)
            }
            SubresourceStates::Common(_) => None,
        };

        if let Some(state) = collapsed {
            self.states = SubresourceStates::Common(state);
        }
    }

    /// Copy every known subresource state of `other` into this tracker
    pub fn apply_known(&mut self, other: &ResourceState) {
        debug_assert_eq!(self.subresource_count, other.subresource_count);
        match &other.states {
            SubresourceStates::Common(state) => {
                if !state.is_unknown() {
                    self.states = SubresourceStates::Common(*state);
                }
            }
            SubresourceStates::PerSubresource(states) => {
                for (subresource, state) in states.iter().enumerate() {
                    if !state.is_unknown() {
                        self.set(subresource as u32, *state);
                    }
                }
            }
        }
    }

    /// Iterate over `(subresource, state)` pairs, expanding a common state
    pub fn iter(&self) -> impl Iterator<Item = (u32, ResourceStates)> + '_ {
        (0..self.subresource_count).map(move |subresource| (subresource, self.get(subresource)))
    }
}

#[cfg(test)]
mod tests {
    use crate::resource_state::ResourceState;
    use ze_gfx::backend::{ResourceStates, ALL_SUBRESOURCES};

    #[test]
    fn collapses_when_uniform() {
        let mut state = ResourceState::new(4, ResourceStates::COMMON);
        state.set(2, ResourceStates::COPY_DEST);
        assert!(!state.is_uniform());
        assert_eq!(state.get(2), ResourceStates::COPY_DEST);
        assert_eq!(state.get(1), ResourceStates::COMMON);
        assert_eq!(state.get(ALL_SUBRESOURCES), ResourceStates::UNKNOWN);

        state.set(2, ResourceStates::COMMON);
        assert!(state.is_uniform());

        state.set(1, ResourceStates::RENDER_TARGET);
        state.set(ALL_SUBRESOURCES, ResourceStates::PIXEL_SHADER_RESOURCE);
        assert!(state.is_uniform());
        assert_eq!(state.get(3), ResourceStates::PIXEL_SHADER_RESOURCE);
    }

    #[test]
    fn many_subresources_spill_to_heap() {
        let mut state = ResourceState::new(64, ResourceStates::COMMON);
        state.set(63, ResourceStates::UNORDERED_ACCESS);
        assert_eq!(state.get(63), ResourceStates::UNORDERED_ACCESS);
        assert_eq!(state.iter().count(), 64);
    }

    #[test]
    fn apply_known_skips_unknown_subresources() {
        let mut global = ResourceState::new(3, ResourceStates::COMMON);
        let mut local = ResourceState::unknown(3);
        local.set(1, ResourceStates::RENDER_TARGET);

        global.apply_known(&local);
        assert_eq!(global.get(0), ResourceStates::COMMON);
        assert_eq!(global.get(1), ResourceStates::RENDER_TARGET);
        assert_eq!(global.get(2), ResourceStates::COMMON);
    }
}
