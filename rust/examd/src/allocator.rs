use crate::model::Classroom;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomShare {
    pub classroom_id: i64,
    pub seats: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Allocation {
    pub shares: Vec<RoomShare>,
    /// Students left without a room once every classroom was consumed.
    pub unplaced: i64,
}

impl Allocation {
    pub fn placed(&self) -> i64 {
        self.shares.iter().map(|s| s.seats).sum()
    }
}

/// Starting index into the capacity-ordered room list for `exam_id`.
pub fn rotation_offset(exam_id: i64, room_count: usize) -> usize {
    if room_count == 0 {
        return 0;
    }
    exam_id.rem_euclid(room_count as i64) as usize
}

/// Spreads `required` students over `classrooms` (expected in capacity
/// descending order). The list is rotated by `exam_id` so consecutive exams
/// start from different rooms, then consumed greedily. Rooms that receive
/// nobody are not part of the allocation.
pub fn allocate_classrooms(exam_id: i64, required: i64, classrooms: &[Classroom]) -> Allocation {
    let mut remaining = required.max(0);
    let mut shares = Vec::new();
    let offset = rotation_offset(exam_id, classrooms.len());

    let rotated = classrooms[offset..].iter().chain(classrooms[..offset].iter());
    for room in rotated {
        if remaining <= 0 {
            break;
        }
        let seats = remaining.min(room.capacity.max(0));
        if seats == 0 {
            continue;
        }
        shares.push(RoomShare {
            classroom_id: room.id,
            seats,
        });
        remaining -= seats;
    }

    Allocation {
        shares,
        unplaced: remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: i64, capacity: i64) -> Classroom {
        Classroom {
            id,
            department_id: 1,
            code: format!("R{id}"),
            name: format!("Room {id}"),
            capacity,
            rows_count: 10,
            cols_count: 10,
            seating_type: "single".into(),
        }
    }

    fn rooms() -> Vec<Classroom> {
        vec![room(1, 60), room(2, 40), room(3, 20)]
    }

    #[test]
    fn rotation_starts_at_exam_id_mod_room_count() {
        let a = allocate_classrooms(4, 30, &rooms());
        // 4 mod 3 == 1 -> starts at the 40-seat room.
        assert_eq!(
            a.shares,
            vec![RoomShare {
                classroom_id: 2,
                seats: 30
            }]
        );
        assert_eq!(a.unplaced, 0);
    }

    #[test]
    fn wraps_around_the_rotated_list() {
        let a = allocate_classrooms(2, 90, &rooms());
        let ids: Vec<i64> = a.shares.iter().map(|s| s.classroom_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(a.shares[0].seats, 20);
        assert_eq!(a.shares[1].seats, 60);
        assert_eq!(a.shares[2].seats, 10);
        assert_eq!(a.placed(), 90);
    }

    #[test]
    fn shortfall_is_reported_not_failed() {
        let a = allocate_classrooms(0, 150, &rooms());
        assert_eq!(a.placed(), 120);
        assert_eq!(a.unplaced, 30);
    }

    #[test]
    fn empty_exam_uses_no_rooms() {
        let a = allocate_classrooms(7, 0, &rooms());
        assert!(a.shares.is_empty());
        assert_eq!(a.unplaced, 0);
    }

    #[test]
    fn no_rooms_leaves_everyone_unplaced() {
        let a = allocate_classrooms(3, 25, &[]);
        assert!(a.shares.is_empty());
        assert_eq!(a.unplaced, 25);
    }

    #[test]
    fn zero_capacity_rooms_are_skipped() {
        let a = allocate_classrooms(0, 10, &[room(1, 0), room(2, 15)]);
        assert_eq!(
            a.shares,
            vec![RoomShare {
                classroom_id: 2,
                seats: 10
            }]
        );
    }
}
