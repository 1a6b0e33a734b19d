//! Identity lookups over collections sorted by id.
//!
//! `SortedById` can only be built from a slice that is sorted (it either sorts
//! it or checks it), so every lookup can binary search.

use twhelp_common::{Ennoblement, Player, PlayerHistory, Tribe, TribeHistory, Village};

pub trait HasId {
    fn id(&self) -> i32;
}

impl HasId for i32 {
    fn id(&self) -> i32 {
        *self
    }
}

impl HasId for Player {
    fn id(&self) -> i32 {
        self.id
    }
}

impl HasId for Tribe {
    fn id(&self) -> i32 {
        self.id
    }
}

impl HasId for Village {
    fn id(&self) -> i32 {
        self.id
    }
}

/// Ennoblements are looked up by the player who took the village.
impl HasId for Ennoblement {
    fn id(&self) -> i32 {
        self.new_owner_id
    }
}

impl HasId for PlayerHistory {
    fn id(&self) -> i32 {
        self.player_id
    }
}

impl HasId for TribeHistory {
    fn id(&self) -> i32 {
        self.tribe_id
    }
}

/// A borrowed slice known to be in ascending id order.
#[derive(Debug)]
pub struct SortedById<'a, T> {
    items: &'a [T],
}

impl<T> Clone for SortedById<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SortedById<'_, T> {}

impl<'a, T: HasId> SortedById<'a, T> {
    /// Sort `items` in place (stable) and view the result.
    pub fn sort(items: &'a mut [T]) -> Self {
        items.sort_by_key(|item| item.id());
        Self { items }
    }

    /// View `items` if they are already in ascending id order.
    pub fn try_new(items: &'a [T]) -> Option<Self> {
        items
            .windows(2)
            .all(|pair| pair[0].id() <= pair[1].id())
            .then_some(Self { items })
    }

    /// Index of the first item with `id`.
    pub fn position(&self, id: i32) -> Option<usize> {
        let index = self.items.partition_point(|item| item.id() < id);
        self.items
            .get(index)
            .filter(|item| item.id() == id)
            .map(|_| index)
    }

    pub fn get(&self, id: i32) -> Option<&'a T> {
        self.position(id).map(|index| &self.items[index])
    }

    pub fn contains(&self, id: i32) -> bool {
        self.position(id).is_some()
    }

    pub fn as_slice(&self) -> &'a [T] {
        self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'a, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_every_member() {
        let mut ids = vec![42, 3, 17, 8, 99, 1];
        let sorted = SortedById::sort(&mut ids);

        for (index, id) in sorted.iter().enumerate() {
            assert_eq!(sorted.position(*id), Some(index));
        }
    }

    #[test]
    fn misses_non_members() {
        let ids = [2, 4, 6, 8];
        let sorted = SortedById::try_new(&ids).unwrap();

        for id in [0, 1, 3, 5, 7, 9, i32::MIN, i32::MAX] {
            assert_eq!(sorted.position(id), None, "id {id}");
        }
    }

    #[test]
    fn empty_input_finds_nothing() {
        let ids: [i32; 0] = [];
        let sorted = SortedById::try_new(&ids).unwrap();
        assert!(sorted.is_empty());
        assert_eq!(sorted.position(1), None);
        assert!(sorted.get(1).is_none());
    }

    #[test]
    fn unsorted_input_is_rejected() {
        assert!(SortedById::try_new(&[3, 1, 2]).is_none());
        assert!(SortedById::try_new(&[1, 1, 2]).is_some());
    }

    #[test]
    fn duplicates_resolve_to_the_first() {
        let ids = [1, 5, 5, 5, 9];
        let sorted = SortedById::try_new(&ids).unwrap();
        assert_eq!(sorted.position(5), Some(1));
    }

    #[test]
    fn ennoblements_are_keyed_by_new_owner() {
        use chrono::{TimeZone, Utc};

        let conquer = |village_id, new_owner_id| Ennoblement {
            village_id,
            new_owner_id,
            new_owner_tribe_id: 0,
            old_owner_id: 0,
            old_owner_tribe_id: 0,
            ennobled_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        };
        let mut conquers = vec![conquer(10, 7), conquer(11, 2)];
        let sorted = SortedById::sort(&mut conquers);

        assert_eq!(sorted.get(7).map(|e| e.village_id), Some(10));
        assert!(sorted.get(10).is_none());
    }
}
