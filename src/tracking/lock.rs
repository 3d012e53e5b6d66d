//! 锁定跟踪器 (Lock Tracker)
//!
//! 职责: 在连续帧之间维持被跟踪者的身份
//! - 未锁定: 选面积大且靠近画面中心的人脸
//! - 已锁定: 按加权距离找回同一个人, 按置信度顺序首个达标即采纳
//! - 丢失: 计时, 跟随模式下启动搜索; 超时两倍且未跟随才彻底放锁
//!
//! 相似度公式的常数 (位置1.0 / 尺寸2.0 / 宽高比50.0 / 趋势-0.5,
//! 基础阈值150, 每丢失一秒放宽20上限200) 是实测标定值, 不要随手调。

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::search::SearchState;
use crate::detection::{FaceBox, FusedFace};

/// 轨迹历史容量
const HISTORY_CAP: usize = 5;

// ========== 相似度标定常数 ==========
const POSITION_WEIGHT: f32 = 1.0;
const SIZE_WEIGHT: f32 = 2.0;
const RATIO_WEIGHT: f32 = 50.0;
const TREND_WEIGHT: f32 = 0.5;

const BASE_THRESHOLD: f32 = 150.0;
const MAX_RELAXATION: f32 = 200.0;
const RELAXATION_PER_SECOND: f32 = 20.0;

/// 锁定状态。主循环线程独占持有, 跨帧存续, 放锁时整体复位。
#[derive(Debug, Clone)]
pub struct LockState {
    pub locked: bool,
    pub locked_box: Option<FaceBox>,
    /// 丢失起点 (锁定中但本帧没找到人时开始计时)
    pub lost_since: Option<Instant>,
    pub search: SearchState,
    /// 最近若干帧的锁定框, 用于运动趋势外推
    pub history: VecDeque<FaceBox>,
    pub target_label: String,
    pub lost_timeout: Duration,
}

/// 本帧选定的跟踪目标及其相对画面中心的误差
#[derive(Debug, Clone, Copy)]
pub struct TrackedTarget {
    pub bbox: FaceBox,
    /// 人脸中心x - 画面中心x (为正表示人在右侧)
    pub diff_x: f32,
    /// 画面中心y - 人脸中心y (为正表示人脸在中心上方)
    pub diff_y: f32,
    pub area: f32,
    pub locked: bool,
}

/// 锁状态迁移, 主循环据此发事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockTransition {
    Lost { search_armed: bool },
    Found { lost_for: Duration },
    SearchPhaseAdvanced { direction: i8, phase: u8 },
    Released,
}

impl LockState {
    pub fn new(lost_timeout: Duration) -> Self {
        Self {
            locked: false,
            locked_box: None,
            lost_since: None,
            search: SearchState::default(),
            history: VecDeque::with_capacity(HISTORY_CAP),
            target_label: "Person".to_string(),
            lost_timeout,
        }
    }

    /// 手动锁定一张人脸
    pub fn lock_on(&mut self, bbox: FaceBox) {
        self.locked = true;
        self.locked_box = Some(bbox);
        self.lost_since = None;
        self.search.clear();
        self.history.clear();
        self.history.push_back(bbox);
    }

    /// 彻底放锁: 全部状态复位
    pub fn release(&mut self) {
        self.locked = false;
        self.locked_box = None;
        self.lost_since = None;
        self.search.clear();
        self.history.clear();
    }

    pub fn rename(&mut self, label: String) -> String {
        std::mem::replace(&mut self.target_label, label)
    }

    /// 每帧入口: 从融合候选中选定跟踪目标并推进锁状态机。
    /// `faces` 须为置信度降序 (融合层输出顺序)。
    pub fn select_target(
        &mut self,
        faces: &[FusedFace],
        frame_center: (f32, f32),
        follow_mode: bool,
        now: Instant,
    ) -> (Option<TrackedTarget>, Vec<LockTransition>) {
        if !self.locked {
            return (self.select_unlocked(faces, frame_center), Vec::new());
        }

        let mut transitions = Vec::new();

        // 已锁定: 按置信度顺序找首个低于阈值的候选 (首个达标, 不是最优)
        let matched = self.locked_box.and_then(|locked| {
            let threshold = self.match_threshold(now);
            faces
                .iter()
                .find(|f| self.similarity(&f.bbox, &locked) < threshold)
                .map(|f| f.bbox)
        });

        if let Some(bbox) = matched {
            if let Some(since) = self.lost_since.take() {
                transitions.push(LockTransition::Found {
                    lost_for: now.duration_since(since),
                });
            }
            self.search.clear();
            self.locked_box = Some(bbox);
            self.history.push_back(bbox);
            if self.history.len() > HISTORY_CAP {
                self.history.pop_front();
            }
            let target = make_target(bbox, frame_center, true);
            return (Some(target), transitions);
        }

        // 没找到锁定目标
        match self.lost_since {
            None => {
                // 首次丢失: 开始计时, 跟随模式下武装搜索
                self.lost_since = Some(now);
                if follow_mode {
                    self.search.arm(now);
                }
                transitions.push(LockTransition::Lost {
                    search_armed: follow_mode,
                });
            }
            Some(since) => {
                let elapsed = now.duration_since(since);
                if self.search.active && self.search.phase == 0 && elapsed > self.lost_timeout / 2 {
                    // 阶段0搜了半个超时还没找到 → 反向加大
                    self.search.advance_phase();
                    transitions.push(LockTransition::SearchPhaseAdvanced {
                        direction: self.search.direction,
                        phase: self.search.phase,
                    });
                } else if !follow_mode && elapsed > self.lost_timeout * 2 {
                    // 跟随模式永不因超时放锁, 非跟随超过两倍超时才放
                    self.release();
                    transitions.push(LockTransition::Released);
                }
            }
        }

        (None, transitions)
    }

    /// 未锁定: score = 面积 - 中心距离平方/1000, 严格更大才替换
    /// (首个最大值胜出, 后续同分不换)
    fn select_unlocked(
        &self,
        faces: &[FusedFace],
        frame_center: (f32, f32),
    ) -> Option<TrackedTarget> {
        let mut best: Option<(FaceBox, f32)> = None;
        for face in faces {
            let (cx, cy) = face.bbox.center();
            let dx = cx - frame_center.0;
            let dy = frame_center.1 - cy;
            let center_distance = dx * dx + dy * dy;
            let score = face.bbox.area() - center_distance / 1000.0;
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((face.bbox, score));
            }
        }
        best.map(|(bbox, _)| make_target(bbox, frame_center, false))
    }

    /// 加权距离: 越小越像锁定目标
    fn similarity(&self, cand: &FaceBox, locked: &FaceBox) -> f32 {
        let position_diff = (cand.x - locked.x).abs() + (cand.y - locked.y).abs();
        let size_diff = (cand.w - locked.w).abs() + (cand.h - locked.h).abs();
        let ratio_diff = (cand.aspect_ratio() - locked.aspect_ratio()).abs();

        // 运动趋势: 用上一帧位置线性外推期望位置, 沿趋势移动的候选加分
        let trend_diff = match self.history.back() {
            Some(prev) => {
                let expected_x = prev.x + (prev.x - locked.x);
                let expected_y = prev.y + (prev.y - locked.y);
                (cand.x - expected_x).abs() + (cand.y - expected_y).abs()
            }
            None => 0.0,
        };

        position_diff * POSITION_WEIGHT + size_diff * SIZE_WEIGHT + ratio_diff * RATIO_WEIGHT
            - trend_diff * TREND_WEIGHT
    }

    /// 丢失期间阈值逐渐放宽: 150 + min(200, 丢失秒数*20)
    fn match_threshold(&self, now: Instant) -> f32 {
        match self.lost_since {
            Some(since) => {
                let lost_secs = now.duration_since(since).as_secs_f32();
                BASE_THRESHOLD + (lost_secs * RELAXATION_PER_SECOND).min(MAX_RELAXATION)
            }
            None => BASE_THRESHOLD,
        }
    }
}

fn make_target(bbox: FaceBox, frame_center: (f32, f32), locked: bool) -> TrackedTarget {
    let (cx, cy) = bbox.center();
    TrackedTarget {
        bbox,
        diff_x: cx - frame_center.0,
        diff_y: frame_center.1 - cy,
        area: bbox.area(),
        locked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CENTER: (f32, f32) = (320.0, 240.0);

    fn face(x: f32, y: f32, w: f32, h: f32) -> FusedFace {
        FusedFace {
            bbox: FaceBox::new(x, y, w, h),
            confidence: 0.9,
        }
    }

    fn lock(timeout_secs: u64) -> LockState {
        LockState::new(Duration::from_secs(timeout_secs))
    }

    #[test]
    fn test_unlocked_prefers_large_centered_face() {
        let mut state = lock(5);
        // 大脸在角落 vs 小脸居中
        let corner = face(0.0, 0.0, 120.0, 120.0); // 面积14400, 距离惩罚大
        let centered = face(270.0, 190.0, 100.0, 100.0); // 面积10000, 居中
        let (target, transitions) =
            state.select_target(&[corner, centered], CENTER, false, Instant::now());
        let target = target.unwrap();
        // corner: 14400 - (260²+180²)/1000 = 14400-100 = 14300 → 角落大脸仍胜
        assert_eq!(target.bbox.w, 120.0);
        assert!(!target.locked);
        assert!(transitions.is_empty());
        assert!(!state.locked);
    }

    #[test]
    fn test_unlocked_first_maximal_wins_on_tie() {
        let mut state = lock(5);
        // 面积相同且关于画面中心对称的两张人脸, 得分完全相等 → 先到者胜
        let a = face(220.0, 140.0, 100.0, 100.0);
        let b = face(320.0, 240.0, 100.0, 100.0);
        let (target, _) = state.select_target(&[a, b], CENTER, false, Instant::now());
        assert_eq!(target.unwrap().bbox, a.bbox);
    }

    #[test]
    fn test_locked_reacquisition_is_first_match() {
        let t0 = Instant::now();
        let mut state = lock(5);
        state.lock_on(FaceBox::new(100.0, 100.0, 100.0, 100.0));

        // 两个都低于阈值: 置信度顺序靠前的胜出, 即使第二个距离更近
        let near_miss = face(110.0, 100.0, 100.0, 100.0); // 相似度 10
        let exact = face(100.0, 100.0, 100.0, 100.0); // 相似度 0
        let (target, _) = state.select_target(&[near_miss, exact], CENTER, false, t0);
        assert_eq!(target.unwrap().bbox.x, 110.0);
        assert_eq!(state.locked_box.unwrap().x, 110.0);
    }

    #[test]
    fn test_locked_rejects_dissimilar_face() {
        let t0 = Instant::now();
        let mut state = lock(5);
        state.lock_on(FaceBox::new(100.0, 100.0, 100.0, 100.0));

        // 位置差 500, 趋势项折半后相似度 250, 仍高于阈值 150
        let far = face(600.0, 100.0, 100.0, 100.0);
        let (target, transitions) = state.select_target(&[far], CENTER, false, t0);
        assert!(target.is_none());
        assert_eq!(
            transitions,
            vec![LockTransition::Lost {
                search_armed: false
            }]
        );
        assert!(state.locked);
        assert!(state.lost_since.is_some());
    }

    #[test]
    fn test_threshold_relaxes_while_lost() {
        let t0 = Instant::now();
        let mut state = lock(60); // 超时很长, 不触发放锁
        state.lock_on(FaceBox::new(100.0, 100.0, 100.0, 100.0));

        // 位置差 400, 趋势折半后相似度 200
        let drifted = face(500.0, 100.0, 100.0, 100.0);

        // 未丢失时 200 >= 150 → 拒绝
        let (target, _) = state.select_target(&[drifted], CENTER, false, t0);
        assert!(target.is_none());

        // 丢失5秒后阈值 150+100=250 → 接受
        let t5 = t0 + Duration::from_secs(5);
        let (target, transitions) = state.select_target(&[drifted], CENTER, false, t5);
        assert!(target.is_some());
        assert_eq!(
            transitions,
            vec![LockTransition::Found {
                lost_for: Duration::from_secs(5)
            }]
        );
        assert!(state.lost_since.is_none());
    }

    #[test]
    fn test_loss_in_follow_mode_arms_search() {
        let t0 = Instant::now();
        let mut state = lock(5);
        state.lock_on(FaceBox::new(100.0, 100.0, 100.0, 100.0));

        let (_, transitions) = state.select_target(&[], CENTER, true, t0);
        assert_eq!(transitions, vec![LockTransition::Lost { search_armed: true }]);
        assert!(state.search.active);
        assert_eq!(state.search.direction, 1);
        assert_eq!(state.search.phase, 0);
    }

    #[test]
    fn test_search_phase_advances_past_half_timeout() {
        let t0 = Instant::now();
        let mut state = lock(4);
        state.lock_on(FaceBox::new(100.0, 100.0, 100.0, 100.0));
        state.select_target(&[], CENTER, true, t0);

        // 半个超时 (2s) 以内不变
        let (_, transitions) =
            state.select_target(&[], CENTER, true, t0 + Duration::from_millis(1900));
        assert!(transitions.is_empty());

        let (_, transitions) =
            state.select_target(&[], CENTER, true, t0 + Duration::from_millis(2100));
        assert_eq!(
            transitions,
            vec![LockTransition::SearchPhaseAdvanced {
                direction: -1,
                phase: 1
            }]
        );

        // 阶段1只进一次
        let (_, transitions) =
            state.select_target(&[], CENTER, true, t0 + Duration::from_secs(3));
        assert!(transitions.is_empty());
    }

    #[test]
    fn test_release_exactly_past_double_timeout_without_follow() {
        let t0 = Instant::now();
        let mut state = lock(4);
        state.lock_on(FaceBox::new(100.0, 100.0, 100.0, 100.0));
        state.select_target(&[], CENTER, false, t0);

        let (_, transitions) =
            state.select_target(&[], CENTER, false, t0 + Duration::from_millis(7900));
        assert!(transitions.is_empty());
        assert!(state.locked);

        let (_, transitions) =
            state.select_target(&[], CENTER, false, t0 + Duration::from_millis(8100));
        assert_eq!(transitions, vec![LockTransition::Released]);
        assert!(!state.locked);
        assert!(state.locked_box.is_none());
        assert!(state.history.is_empty());
        assert!(!state.search.active);
    }

    #[test]
    fn test_follow_mode_never_force_releases() {
        let t0 = Instant::now();
        let mut state = lock(4);
        state.lock_on(FaceBox::new(100.0, 100.0, 100.0, 100.0));
        state.select_target(&[], CENTER, true, t0);

        // 任意久都不放锁, 无限搜索
        for secs in [10u64, 100, 1000] {
            let (_, transitions) =
                state.select_target(&[], CENTER, true, t0 + Duration::from_secs(secs));
            assert!(!transitions.contains(&LockTransition::Released));
            assert!(state.locked);
            assert!(state.search.active);
        }
    }

    #[test]
    fn test_release_applies_even_with_stale_search_armed() {
        // 跟随中丢失武装了搜索, 随后跟随被关掉:
        // 搜索残留不阻止两倍超时放锁
        let t0 = Instant::now();
        let mut state = lock(4);
        state.lock_on(FaceBox::new(100.0, 100.0, 100.0, 100.0));
        state.select_target(&[], CENTER, true, t0);

        // 阶段先推进 (条件在放锁之前判定)
        state.select_target(&[], CENTER, false, t0 + Duration::from_secs(3));
        let (_, transitions) =
            state.select_target(&[], CENTER, false, t0 + Duration::from_secs(9));
        assert_eq!(transitions, vec![LockTransition::Released]);
        assert!(!state.locked);
    }

    #[test]
    fn test_reacquisition_clears_search_and_updates_history() {
        let t0 = Instant::now();
        let mut state = lock(5);
        state.lock_on(FaceBox::new(100.0, 100.0, 100.0, 100.0));
        state.select_target(&[], CENTER, true, t0);
        assert!(state.search.active);

        let back = face(105.0, 100.0, 100.0, 100.0);
        let (target, _) = state.select_target(&[back], CENTER, true, t0 + Duration::from_secs(1));
        assert!(target.is_some());
        assert!(!state.search.active);
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.history.back().unwrap().x, 105.0);
    }

    #[test]
    fn test_history_capped_at_five() {
        let t0 = Instant::now();
        let mut state = lock(5);
        state.lock_on(FaceBox::new(100.0, 100.0, 100.0, 100.0));

        for i in 0..8 {
            let f = face(100.0 + i as f32, 100.0, 100.0, 100.0);
            let now = t0 + Duration::from_millis(100 * i as u64);
            let (target, _) = state.select_target(&[f], CENTER, false, now);
            assert!(target.is_some());
        }
        assert_eq!(state.history.len(), 5);
        // 最老的被淘汰
        assert_eq!(state.history.front().unwrap().x, 103.0);
    }

    #[test]
    fn test_trend_term_halves_pure_translation_distance() {
        // 匹配后 history.back() 与锁定框一致, 趋势项退化为位置差的一半折扣,
        // 纯平移的候选有效相似度 = 0.5 * 位置差
        let t0 = Instant::now();
        let mut state = lock(5);
        state.lock_on(FaceBox::new(100.0, 100.0, 100.0, 100.0));

        // 位置差 280: 无折扣会超阈值, 折半后 140 < 150 → 接受
        let moved = face(380.0, 100.0, 100.0, 100.0);
        let (target, _) = state.select_target(&[moved], CENTER, false, t0);
        assert!(target.is_some());
        assert_eq!(state.locked_box.unwrap().x, 380.0);
    }

    #[test]
    fn test_rename_returns_previous_label() {
        let mut state = lock(5);
        let old = state.rename("Alice".to_string());
        assert_eq!(old, "Person");
        assert_eq!(state.target_label, "Alice");
    }
}
